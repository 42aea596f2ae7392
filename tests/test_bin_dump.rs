mod utils;

use utils::{run, write_program};

#[test]
fn dump_of_an_unoptimized_program_names_every_opcode() {
    let path = write_program("dump_raw.bf", b"+>-<.,");
    let out = run(&["dump", "--no-optimize", path.to_str().unwrap()], b"");
    assert_eq!(out.exit_code, 0);
    let text = String::from_utf8(out.stdout).unwrap();
    assert!(text.contains("add"));
    assert!(text.contains("move"));
    assert!(text.contains("out"));
    assert!(text.contains("in"));
}

#[test]
fn dump_of_an_optimized_clearing_loop_collapses_to_a_set() {
    let path = write_program("dump_clear.bf", b",[-].");
    let out = run(&["dump", path.to_str().unwrap()], b"");
    assert_eq!(out.exit_code, 0);
    let text = String::from_utf8(out.stdout).unwrap();
    assert!(text.contains("set"));
    assert!(!text.contains("loop_start"));
}

#[test]
fn dumped_bytecode_text_round_trips_through_the_parser() {
    // Dump, then feed the dump straight back in as a bytecode-text
    // program, and check that running either form produces the same
    // output (the round-trip law from the IR's spec).
    let path = write_program("roundtrip.bf", b"++++++++[>++++++++<-]>+.");
    let dumped = run(&["dump", path.to_str().unwrap()], b"");
    assert_eq!(dumped.exit_code, 0);

    let dump_path = write_program("roundtrip.bftxt", &dumped.stdout);
    let direct = run(&["run", "--no-jit", path.to_str().unwrap()], b"");
    let via_dump = run(&["run", "--no-jit", "--bytecode", dump_path.to_str().unwrap()], b"");
    assert_eq!(direct.stdout, via_dump.stdout);
}
