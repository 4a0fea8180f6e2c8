//! # class-stubber
//!
//! Turns compiled Java class files, and the jar/zip archives holding them,
//! into API stubs: declarations stay, method bodies go.
//!
//! ## Architecture
//!
//! - **constpool**: Constant pool entries, lookup and find-or-insert allocation
//! - **classfile**: Class binary reader/writer and the mutable `ClassUnit` model
//! - **bytecode**: Instruction decoding into reference-bearing kinds
//! - **filter**: Visibility/synthetic member filter
//! - **stub**: The stub rewriter, local/anonymous detection and the `StubMarker` guard
//! - **archive**: Entry-ordered rewriting of (nested) archives
//! - **scan**: Input directory enumeration
//! - **convert**: Run orchestration over files and directories
//! - **report**: Run statistics, summaries and the output manifest
//! - **config**: Run configuration, scope and keep-list parsing
//! - **cli**: Command-line surface
//! - **error**: Typed errors

pub mod archive;
pub mod bytecode;
pub mod classfile;
pub mod cli;
pub mod config;
pub mod constpool;
pub mod convert;
pub mod error;
pub mod filter;
pub mod report;
pub mod scan;
pub mod stub;

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Runs `f` with a debug-level subscriber on the current thread and returns what it logged.
    pub fn capture_logs<F: FnOnce()>(f: F) -> String {
        let buffer = SharedBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
