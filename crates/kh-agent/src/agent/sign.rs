//! Sign operations
//!
//! A sign operation keeps no resumption state of its own: every run starts
//! from the top and looks at the key as it is now.
//!
//! ```text
//! cleartext held ---> validate -> sign -> reply
//! encrypted only ---> prompt (or wait for the open one), join the key's blocked list
//!                       woken after decryption ---> run again
//!                       failed along with the key -> failure reply
//! ```

use tracing::debug;

use kh_core::{ClientId, RequestId};
use kh_protocol::{MessageType, WireWrite};

use super::reply::{self, Failure};
use super::{Agent, KEY_DELETED};
use crate::keys::ssh2;
use crate::ops::{OpId, SignOp, Step};

pub(crate) const COULD_NOT_PROMPT: &str =
    "on-demand decryption could not prompt for a passphrase";

impl Agent {
    /// Advance a sign operation as far as it can go
    pub(super) fn resume_sign(
        &mut self,
        id: OpId,
        client: ClientId,
        request: RequestId,
        sign: &SignOp,
    ) -> Step {
        let Some(record) = self.keys.get(&sign.key) else {
            return Step::Ready(Err(Failure::generic(KEY_DELETED)));
        };

        if !record.has_cleartext() {
            let prompt_busy = self.prompt.is_some() || record.prompt.is_some();
            if !prompt_busy && !self.request_passphrase(&sign.key, client) {
                return Step::Ready(Err(Failure::generic(COULD_NOT_PROMPT)));
            }
            if let Some(record) = self.keys.get_mut(&sign.key) {
                record.blocked.push_back(id);
            }
            debug!(conn = %client, req = %request, "sign request waiting for passphrase");
            return Step::Pending;
        }

        let Some(key) = record.cleartext.as_ref().and_then(|m| m.as_ssh2()) else {
            return Step::Ready(Err(Failure::generic("key not found")));
        };

        let unsupported = sign.flags.excess_over(ssh2::supported_flags(key));
        if !unsupported.is_empty() {
            return Step::Ready(Err(Failure::generic(format!(
                "unsupported flag bits 0x{:08x}",
                unsupported.bits()
            ))));
        }

        if let Some(reason) = ssh2::invalid_reason(key, sign.flags) {
            return Step::Ready(Err(Failure::generic(format!("key invalid: {}", reason))));
        }

        let signature = match ssh2::sign(key, &sign.data, sign.flags) {
            Ok(signature) => signature,
            Err(e) => return Step::Ready(Err(Failure::generic(e.to_string()))),
        };

        let mut buf = reply::begin(MessageType::Ssh2SignResponse);
        buf.put_string(&signature);
        Step::Ready(Ok(buf.freeze()))
    }
}
