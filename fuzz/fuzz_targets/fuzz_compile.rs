#![no_main]

use libfuzzer_sys::fuzz_target;
use tawk::{Compiler, ExtensionRegistry};

fuzz_target!(|data: &str| {
    if data.len() > 10000 {
        return;
    }
    // full pipeline up to linking; running fuzzed programs could call system()
    let compiler = Compiler::new(ExtensionRegistry::new(), true, true, false);
    if let Ok(tuples) = compiler.compile_str(data) {
        assert!(tuples.is_linked());
    }
});
