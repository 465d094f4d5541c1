//! Shell runtime library written next to every build.
//!
//! Generated modules source it to get step instrumentation
//! (`jaiph__run_step`), the read-only rule wrapper
//! (`jaiph__execute_readonly`) and the prompt runner (`jaiph__prompt`).
//! Its function names and the event line format form a fixed ABI between
//! the code generator, the library and the run harness.

/// File name of the runtime library in every output root.
pub const STDLIB_FILE_NAME: &str = "jaiph_stdlib.sh";

/// Prefix marking a step-event line on the diagnostic stream.
pub const EVENT_PREFIX: &str = "__JAIPH_EVENT__ ";

/// Environment variable naming the descriptor events are written to.
pub const EVENT_FD_VAR: &str = "JAIPH_EVENT_FD";

const TEMPLATE: &str = include_str!("jaiph_stdlib.sh");

/// Library source with the crate version filled in.
pub fn stdlib_source() -> String {
    TEMPLATE.replace("@JAIPH_VERSION@", crate::VERSION)
}
