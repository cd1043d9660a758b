//! vscan CLI binary.
//!
//! All logic lives in the library; main only maps the CLI result to a
//! process exit code.

fn main() {
    std::process::exit(vscan::cli::run());
}
