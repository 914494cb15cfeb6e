//! Styled terminal output for user-facing messages.

use console::style;

pub fn banner() {
    println!("{}", style("    ★ DREAMLAND ★\n    User's Choice").magenta());
    println!();
}

pub fn status(msg: &str) {
    println!("{} {}", style("[★]").blue(), msg);
}

pub fn ok(msg: &str) {
    println!("{} {}", style("[✓]").green(), msg);
}

pub fn warn(msg: &str) {
    println!("{} {}", style("[!]").yellow(), msg);
}

pub fn err(msg: &str) {
    eprintln!("{} {}", style("[✗]").red(), msg);
}
