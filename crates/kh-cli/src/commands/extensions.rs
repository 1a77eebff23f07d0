//! Extensions command implementation

use anyhow::Result;

use crate::ipc::AgentClient;
use crate::output::print_info;

/// Print the extensions the agent supports
pub async fn extensions_command(client: &mut AgentClient) -> Result<()> {
    let names = client.query_extensions().await?;
    if names.is_empty() {
        print_info("The agent supports no extensions");
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}
