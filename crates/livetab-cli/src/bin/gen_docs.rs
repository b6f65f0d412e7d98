//! Binary that emits command-line options markdown to stdout.
//!
//! Used when refreshing the command-line reference in the docs.

fn main() {
    print!("{}", livetab_cli::render_options_markdown());
}
