//! On-demand decryption of encrypted keys

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use kh_core::{ClientId, DialogId};

use super::sign::COULD_NOT_PROMPT;
use super::{ActivePrompt, Agent};
use crate::keys::{ssh2, KeyError, KeyMaterial};
use crate::keystore::SortKey;

const UNABLE_TO_CONTINUE: &str = "unable to continue creating passphrase prompts";
const UNABLE_TO_DECRYPT: &str = "unable to decrypt key";
const USER_REFUSED: &str = "user refused to supply passphrase";

impl Agent {
    /// Open a passphrase prompt for a key on behalf of `client`
    ///
    /// True if a prompt for this key is open afterwards. Fails if the client
    /// may not prompt or the prompter could not show anything.
    pub(super) fn request_passphrase(&mut self, key: &SortKey, client: ClientId) -> bool {
        let Some(record) = self.keys.get(key) else {
            return false;
        };
        if record.prompt.is_some() {
            return true;
        }
        if self.prompt.is_some() {
            return false;
        }
        let can_prompt = self.clients.get(client).is_some_and(|c| c.can_prompt);
        if !can_prompt {
            return false;
        }

        let label = if record.comment.is_empty() {
            ssh2::fingerprint(record.blob())
        } else {
            record.comment.clone()
        };
        let dialog = DialogId::new(self.next_dialog);
        self.next_dialog += 1;
        if !self.prompter.ask_passphrase(dialog, &label) {
            warn!(%dialog, key = %label, "unable to show passphrase prompt");
            return false;
        }

        if let Some(record) = self.keys.get_mut(key) {
            record.prompt = Some(dialog);
        }
        self.prompt = Some(ActivePrompt {
            dialog,
            key: key.clone(),
        });
        info!(conn = %client, %dialog, key = %label, "requesting passphrase");
        true
    }

    /// Close the open prompt if it is `dialog`, returning the key it was for
    fn close_prompt(&mut self, dialog: DialogId) -> Option<SortKey> {
        if self.prompt.as_ref().map(|p| p.dialog) != Some(dialog) {
            debug!(%dialog, "ignoring outcome of stale passphrase prompt");
            return None;
        }
        let active = self.prompt.take()?;
        let record = self.keys.get_mut(&active.key)?;
        if record.prompt != Some(dialog) {
            return None;
        }
        record.prompt = None;
        Some(active.key)
    }

    pub(super) fn passphrase_supplied(&mut self, dialog: DialogId, passphrase: Zeroizing<String>) {
        if let Some(key) = self.close_prompt(dialog) {
            self.try_decrypt(&key, &passphrase);
        }
        self.kick_next_prompt();
    }

    pub(super) fn passphrase_refused(&mut self, dialog: DialogId) {
        if let Some(key) = self.close_prompt(dialog) {
            info!(%dialog, "passphrase prompt refused");
            self.fail_blocked(&key, USER_REFUSED);
        }
        self.kick_next_prompt();
    }

    fn try_decrypt(&mut self, key: &SortKey, passphrase: &str) {
        let Some(record) = self.keys.get_mut(key) else {
            return;
        };
        let outcome = match &record.encrypted {
            Some(file) => file.decrypt(passphrase.as_bytes()),
            None => Err(KeyError::KeyFile("no encrypted key file held".to_string())),
        };

        match outcome {
            Ok(private) => {
                if record.comment.is_empty() {
                    record.comment = private.comment().to_string();
                }
                if record.cleartext.is_none() {
                    record.cleartext = Some(KeyMaterial::Ssh2(private));
                }
                info!(key = %ssh2::fingerprint(record.blob()), waiting = record.blocked.len(), "key decrypted");
                self.wake_blocked(key);
            }
            Err(KeyError::WrongPassphrase) => {
                warn!(key = %ssh2::fingerprint(record.blob()), "wrong passphrase");
                let Some(head) = record.blocked.front().copied() else {
                    return;
                };
                let reprompted = self
                    .ops
                    .get(head)
                    .map(|op| op.client)
                    .is_some_and(|client| self.request_passphrase(key, client));
                if !reprompted {
                    self.fail_blocked(key, UNABLE_TO_CONTINUE);
                }
            }
            Err(e) => {
                warn!(key = %ssh2::fingerprint(record.blob()), error = %e, "unable to decrypt key");
                self.fail_blocked(key, UNABLE_TO_DECRYPT);
            }
        }
    }

    /// While no prompt is open, serve the next key that has waiters
    pub(super) fn kick_next_prompt(&mut self) {
        while self.prompt.is_none() {
            let Some(record) = self.keys.iter().find(|r| !r.blocked.is_empty()) else {
                return;
            };
            let key = record.sort_key();
            if record.has_cleartext() {
                self.wake_blocked(&key);
                continue;
            }
            let head_client = record
                .blocked
                .front()
                .and_then(|&id| self.ops.get(id))
                .map(|op| op.client);
            let prompted = head_client.is_some_and(|client| self.request_passphrase(&key, client));
            if !prompted {
                self.fail_blocked(&key, COULD_NOT_PROMPT);
            }
        }
    }
}
