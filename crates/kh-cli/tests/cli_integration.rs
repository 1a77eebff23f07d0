//! CLI integration tests
//!
//! Tests the keyhold CLI using assert_cmd, against an agent running in the
//! test process.

use std::path::{Path, PathBuf};
use std::process::Output;

use assert_cmd::prelude::*;
use assert_cmd::Command;
use predicates::prelude::*;
use rand::rngs::OsRng;
use ssh_key::{Algorithm, LineEnding, PrivateKey};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use kh_agent::keys::ppk::{self, Argon2Params};
use kh_agent::service::EVENT_CHANNEL_CAPACITY;
use kh_agent::{run_agent, Agent, AgentListener, NoPrompter};

fn keyhold() -> Command {
    Command::cargo_bin("keyhold")
        .expect("Failed to locate keyhold binary - ensure it's built before running tests")
}

/// Agent serving a socket in a temp directory until dropped
struct TestAgent {
    dir: tempfile::TempDir,
    socket: PathBuf,
    cancel: CancellationToken,
}

impl TestAgent {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agent.sock");
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let agent = Agent::new(Box::new(NoPrompter));
        let listener = AgentListener::bind(&socket, agent.client_ids(), tx, cancel.clone())
            .await
            .expect("Failed to bind agent socket");
        tokio::spawn(run_agent(agent, rx, cancel.clone()));
        tokio::spawn(listener.run());

        Self {
            dir,
            socket,
            cancel,
        }
    }

    /// Write `key` as an OpenSSH file, encrypted if a passphrase is given
    fn key_file(&self, name: &str, key: &PrivateKey, passphrase: Option<&str>) -> PathBuf {
        let path = self.dir.path().join(name);
        let key = match passphrase {
            Some(passphrase) => key.encrypt(&mut OsRng, passphrase).unwrap(),
            None => key.clone(),
        };
        std::fs::write(&path, key.to_openssh(LineEnding::LF).unwrap().as_bytes()).unwrap();
        path
    }

    /// Run the CLI against this agent without blocking the runtime
    async fn run(&self, args: &[&str], stdin: Option<&str>) -> Output {
        let mut cmd = keyhold();
        cmd.env("SSH_AUTH_SOCK", &self.socket).args(args);
        if let Some(stdin) = stdin {
            cmd.write_stdin(stdin.to_string());
        }
        tokio::task::spawn_blocking(move || cmd.output().unwrap())
            .await
            .unwrap()
    }
}

impl Drop for TestAgent {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn ed25519(comment: &str) -> PrivateKey {
    let mut key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
    key.set_comment(comment);
    key
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_cli_help() {
    keyhold()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("keyhold"))
        .stdout(predicate::str::contains("SSH agent"));
}

#[test]
fn test_cli_version() {
    keyhold()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("keyhold"));
}

#[test]
fn test_cli_delete_needs_key_or_all() {
    keyhold().arg("delete").assert().failure();
    keyhold()
        .args(["delete", "some-key", "--all"])
        .assert()
        .failure();
}

#[test]
fn test_cli_no_agent_socket() {
    keyhold()
        .env_remove("SSH_AUTH_SOCK")
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("SSH_AUTH_SOCK"));
}

#[test]
fn test_cli_agent_not_running() {
    let dir = tempfile::tempdir().unwrap();
    keyhold()
        .args(["--socket", path_str(&dir.path().join("absent.sock")), "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Is it running?"));
}

#[test]
fn test_cli_config_set_get() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    let config = path_str(&config);

    keyhold()
        .args(["--config", config, "config", "set", "prompt_timeout", "45"])
        .assert()
        .success();
    keyhold()
        .args(["--config", config, "config", "get", "prompt_timeout"])
        .assert()
        .success()
        .stdout(predicate::str::contains("45"));
    keyhold()
        .args(["--config", config, "config", "set", "add_encrypted", "maybe"])
        .assert()
        .failure();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_list_empty_agent() {
    let agent = TestAgent::start().await;
    agent
        .run(&["list"], None)
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("The agent has no keys."));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_add_list_and_delete() {
    let agent = TestAgent::start().await;
    let path = agent.key_file("id_work", &ed25519("work@laptop"), None);

    agent
        .run(&["add", path_str(&path)], None)
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("Added"));
    agent
        .run(&["add", path_str(&path)], None)
        .await
        .assert()
        .success()
        .stderr(predicate::str::contains("already in the agent"));
    agent
        .run(&["list", "--long"], None)
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("work@laptop"))
        .stdout(predicate::str::contains("ssh-ed25519"))
        .stdout(predicate::str::contains("cleartext"));

    agent
        .run(&["delete", "work@laptop"], None)
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed"));
    agent
        .run(&["list"], None)
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("The agent has no keys."));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_add_decrypts_with_piped_passphrase() {
    let agent = TestAgent::start().await;
    let path = agent.key_file("id_locked", &ed25519("locked"), Some("hunter2"));

    agent
        .run(&["add", path_str(&path)], Some("wrong\nhunter2\n"))
        .await
        .assert()
        .success()
        .stderr(predicate::str::contains("Wrong passphrase"));
    agent
        .run(&["list", "--long"], None)
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("locked"))
        .stdout(predicate::str::contains("cleartext"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_add_encrypted_and_reencrypt_all() {
    let agent = TestAgent::start().await;
    let plain = agent.key_file("id_plain", &ed25519("plain"), None);
    let locked = agent.key_file("id_locked", &ed25519("locked"), Some("hunter2"));

    agent
        .run(&["add", path_str(&plain)], None)
        .await
        .assert()
        .success();
    // converted to PPK here, so the agent can show its comment while locked
    agent
        .run(&["add", "--encrypted", path_str(&locked)], Some("hunter2\n"))
        .await
        .assert()
        .success();
    agent
        .run(&["list", "--long"], None)
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("locked"))
        .stdout(predicate::str::contains("encrypted"));

    agent
        .run(&["reencrypt", "--all"], None)
        .await
        .assert()
        .success()
        .stderr(predicate::str::contains("1 key remains unencrypted"));
    agent
        .run(&["reencrypt", "plain"], None)
        .await
        .assert()
        .failure()
        .stderr(predicate::str::contains("agent failed to re-encrypt the key"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_add_encrypted_ppk_file() {
    let agent = TestAgent::start().await;
    let params = Argon2Params {
        memory_kib: 64,
        passes: 1,
        ..Argon2Params::default()
    };
    let ppk = ppk::encode(&ed25519("vault@desk"), Some(b"hunter2"), &params, &mut OsRng).unwrap();
    let path = agent.dir.path().join("vault.ppk");
    std::fs::write(&path, ppk).unwrap();

    // sent as is, without asking for the passphrase
    agent
        .run(&["add", "--encrypted", path_str(&path)], None)
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("Added"));
    agent
        .run(&["list", "--long"], None)
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("vault@desk"))
        .stdout(predicate::str::contains("encrypted"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_extensions() {
    let agent = TestAgent::start().await;
    agent
        .run(&["extensions"], None)
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("query"))
        .stdout(predicate::str::contains(
            "list-extended@putty.projects.tartarus.org",
        ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sign_prints_signature_blob() {
    let agent = TestAgent::start().await;
    let path = agent.key_file("id_sign", &ed25519("signer"), None);
    let data = agent.dir.path().join("data");
    std::fs::write(&data, b"sign me").unwrap();

    agent
        .run(&["add", path_str(&path)], None)
        .await
        .assert()
        .success();

    // string "ssh-ed25519" leads the signature blob
    agent
        .run(&["sign", "signer", path_str(&data)], None)
        .await
        .assert()
        .success()
        .stdout(predicate::str::starts_with("0000000b7373682d65643235353139"));

    agent
        .run(&["sign", "nobody", path_str(&data)], None)
        .await
        .assert()
        .failure()
        .stderr(predicate::str::contains("No key in the agent matches"));
}
