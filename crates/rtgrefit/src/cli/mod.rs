//! Subcommands of the `rtgrefit` binary.

pub mod cache;
pub mod config;
pub mod output;
pub mod summary;

/// Report a failed command on stderr, as JSON when the command was asked
/// for JSON output.
pub fn print_error(err: &anyhow::Error, json: bool) {
    if json {
        let chain: Vec<String> = err.chain().map(|cause| cause.to_string()).collect();
        let payload = serde_json::json!({
            "status": "failed",
            "error": err.to_string(),
            "causes": chain,
        });
        eprintln!("{}", payload);
    } else {
        eprintln!("Error: {:#}", err);
    }
}
