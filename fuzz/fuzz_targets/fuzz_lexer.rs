#![no_main]

use libfuzzer_sys::fuzz_target;
use tawk::Lexer;

fuzz_target!(|data: &str| {
    // errors are fine, panics and hangs are not
    let _ = Lexer::new(data).tokenize();
});
