// glvnd/build.rs
//
//! The `glvnd` build script.

use cfg_aliases::cfg_aliases;
use gl_generator::{Api, Fallbacks, Profile, Registry};
use std::env;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

fn main() {
    // Setup aliases for #[cfg] checks
    cfg_aliases! {
        linux: { target_os = "linux" },

        // Architectures with stub templates. `gd-portable` turns code generation off entirely.
        x86_64_entry: { all(unix, target_arch = "x86_64", not(feature = "gd-portable")) },
        aarch64_entry: { all(unix, target_arch = "aarch64", not(target_os = "macos"), not(feature = "gd-portable")) },
        native_entry: { any(x86_64_entry, aarch64_entry) },

        // The thread-local stubs need a thread pointer whose layout we know.
        tls_entry: { all(native_entry, linux, not(feature = "gd-force-tsd")) },
    }

    let dest = PathBuf::from(&env::var("OUT_DIR").unwrap());

    // Every entry point in the desktop GL registry gets a static slot, in name order.
    let registry = Registry::new(Api::Gl, (4, 6), Profile::Compatibility, Fallbacks::All, []);
    let file = File::create(dest.join("static_entries.rs")).unwrap();
    let mut file = BufWriter::new(file);
    writeln!(file, "pub(crate) static STATIC_ENTRY_POINTS: &[&str] = &[").unwrap();
    for cmd in registry.cmds.iter() {
        writeln!(file, "    \"gl{}\",", cmd.proto.ident).unwrap();
    }
    writeln!(file, "];").unwrap();
}
