//! CLI command implementations

mod add;
mod config;
mod delete;
mod extensions;
mod list;
mod reencrypt;
mod sign;

use anyhow::{bail, Result};

use crate::ipc::Identity;

pub use add::add_command;
pub use config::{config_edit, config_get, config_init, config_set, config_show};
pub use delete::delete_command;
pub use extensions::extensions_command;
pub use list::list_command;
pub use reencrypt::reencrypt_command;
pub use sign::sign_command;

/// The one key in `keys` that `target` names
pub(crate) fn find_key(keys: Vec<Identity>, target: &str) -> Result<Identity> {
    if let Some(exact) = keys.iter().find(|k| k.fingerprint() == target) {
        return Ok(exact.clone());
    }

    let mut found: Vec<Identity> = keys.into_iter().filter(|k| k.matches(target)).collect();
    match found.len() {
        0 => bail!("No key in the agent matches '{}'", target),
        1 => Ok(found.remove(0)),
        n => bail!(
            "'{}' matches {} keys; give more of the fingerprint",
            target,
            n
        ),
    }
}
