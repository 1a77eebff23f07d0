//! List command implementation

use anyhow::Result;

use crate::ipc::AgentClient;
use crate::output::{format_keys, print_error};

/// Execute the list command
pub async fn list_command(client: &mut AgentClient, long: bool) -> Result<()> {
    let keys = match client.list_all().await {
        Ok(keys) => keys,
        Err(e) => {
            print_error(&format!("Failed to list keys: {}", e));
            return Err(e);
        }
    };

    println!("{}", format_keys(&keys, long));
    Ok(())
}
