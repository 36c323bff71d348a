//! Version report: this tool's version plus whatever each configured producer
//! binary says about itself.

use crate::config::UlsConfig;
use crate::product::Product;
use std::process::{Command, Stdio};

const UNKNOWN: &str = "n/a";

/// Ask one producer binary for its version.
///
/// Returns the first line of its stdout, `n/a` when it prints nothing, and
/// `n/a -> (<error>)` when it cannot be run at all.
pub fn producer_version(runtime: Option<&str>, binary: &str) -> String {
    let mut cmd = match runtime {
        Some(rt) => {
            let mut cmd = Command::new(rt);
            cmd.arg(binary);
            cmd
        }
        None => Command::new(binary),
    };
    cmd.arg("version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    match cmd.output() {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            match stdout.lines().next().map(str::trim) {
                Some(line) if !line.is_empty() => line.to_string(),
                _ => UNKNOWN.to_string(),
            }
        }
        Err(e) => format!("{UNKNOWN} -> ({e})"),
    }
}

/// Render the full report printed by `--version-report`.
pub fn report(config: &UlsConfig) -> String {
    let builder = config.command_builder();
    let runtime = builder.runtime.as_deref();

    let mut out = format!(
        "{} Version information\n{} Version\t\t{}\n\n",
        config.user_agent.suite,
        config.user_agent.suite,
        env!("CARGO_PKG_VERSION")
    );
    for product in Product::ALL {
        let binary = config.products.get(product).binary.to_string_lossy();
        out.push_str(&format!(
            "{product} Version\t\t{}\n",
            producer_version(runtime, &binary)
        ));
    }
    out.push_str(&format!(
        "\nOS Platform\t\t{}\nOS Arch\t\t\t{}\n",
        std::env::consts::OS,
        std::env::consts::ARCH
    ));
    out
}
