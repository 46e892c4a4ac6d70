//! The keyspace actor: one tokio task per shard, strict FIFO intake, and the
//! router object that owns every shard handle.
//!
//! Callers talk to a shard through [`KeyspaceHandle`]: each request carries a
//! oneshot reply sender, and the outer timeout bounds only the reply wait.
//! Blocking list commands defer their reply by parking that sender in the
//! blocked-op registry; later pushes wake parked callers FIFO.

use crate::core::commands::{pushed_keys, Command, Reply, Verdict};
use crate::core::common::EdisError;
use crate::core::config::Config;
use crate::core::keyspace::access::TypeSelector;
use crate::core::keyspace::blocking::ReplySender;
use crate::core::keyspace::Keyspace;
use crate::core::notify::CommandNotifier;
use crate::core::storage::engine::{FileStore, OrderedKeyValueStore};
use crate::core::types::Item;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

const REQUEST_QUEUE_DEPTH: usize = 1024;

/// Reply-wait budget for the internal legs of the cross-shard MOVE protocol.
const MOVE_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) enum Request {
    Run { command: Command, reply: ReplySender },
    Exec { commands: Vec<Command>, reply: ReplySender },
    /// Internal MOVE handoff: store the item unless the slot is occupied.
    Receive { item: Item, reply: ReplySender },
}

/// Cloneable client handle to one shard actor.
#[derive(Debug, Clone)]
pub struct KeyspaceHandle {
    index: usize,
    sender: mpsc::Sender<Request>,
}

impl KeyspaceHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Runs one command, waiting up to `timeout` for the reply. The timeout
    /// rejects the reply wait only; the actor may still complete the command
    /// and update state.
    pub async fn run(&self, command: Command, timeout: Duration) -> Result<Reply, EdisError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Request::Run { command, reply: reply_tx }).await?;
        Self::await_reply(reply_rx, timeout).await
    }

    /// Replays a command sequence atomically within the actor, one reply slot
    /// per command. A command that would block records an empty slot.
    pub async fn exec(
        &self,
        commands: Vec<Command>,
        timeout: Duration,
    ) -> Result<Reply, EdisError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Request::Exec { commands, reply: reply_tx }).await?;
        Self::await_reply(reply_rx, timeout).await
    }

    pub(crate) async fn receive(&self, item: Item) -> Result<Reply, EdisError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Request::Receive { item, reply: reply_tx }).await?;
        Self::await_reply(reply_rx, MOVE_TIMEOUT).await
    }

    async fn send(&self, request: Request) -> Result<(), EdisError> {
        self.sender
            .send(request)
            .await
            .map_err(|_| EdisError::Unexpected("keyspace actor terminated".to_string()))
    }

    async fn await_reply(
        reply_rx: oneshot::Receiver<Result<Reply, EdisError>>,
        timeout: Duration,
    ) -> Result<Reply, EdisError> {
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(EdisError::Unexpected("keyspace actor dropped the reply".to_string())),
            Err(_) => Err(EdisError::Timeout),
        }
    }
}

/// The N-shard server: opens one keyspace actor per database index and keeps
/// the router table mapping index to handle.
pub struct Edis {
    handles: Vec<KeyspaceHandle>,
}

impl Edis {
    /// Opens every shard under `config.data_dir` and spawns its actor task.
    /// Must be called within a tokio runtime.
    pub fn open(config: &Config, notifier: Arc<dyn CommandNotifier>) -> Result<Edis, EdisError> {
        if config.databases == 0 {
            return Err(EdisError::Config("databases must be at least 1".to_string()));
        }
        std::fs::create_dir_all(&config.data_dir)?;

        let mut receivers = Vec::with_capacity(config.databases);
        let mut handles = Vec::with_capacity(config.databases);
        for index in 0..config.databases {
            let (sender, receiver) = mpsc::channel(REQUEST_QUEUE_DEPTH);
            handles.push(KeyspaceHandle { index, sender });
            receivers.push(receiver);
        }
        for (index, receiver) in receivers.into_iter().enumerate() {
            let keyspace: Keyspace<FileStore> = Keyspace::open(
                index,
                config.shard_path(index),
                notifier.clone(),
                handles.clone(),
            )?;
            tokio::spawn(run_loop(keyspace, receiver));
        }
        Ok(Edis { handles })
    }

    pub fn db(&self, index: usize) -> Option<&KeyspaceHandle> {
        self.handles.get(index)
    }

    pub fn databases(&self) -> usize {
        self.handles.len()
    }
}

async fn run_loop<S: OrderedKeyValueStore>(
    mut keyspace: Keyspace<S>,
    mut receiver: mpsc::Receiver<Request>,
) {
    while let Some(request) = receiver.recv().await {
        // Per-request sweep: deadline-elapsed waiters get their empty reply,
        // disconnected ones are dropped silently.
        for waiter in keyspace.blocked.sweep(Instant::now()) {
            waiter.fulfill(Ok(Reply::Nil));
        }
        match request {
            Request::Run { command, reply } => keyspace.serve(command, reply).await,
            Request::Exec { commands, reply } => keyspace.serve_exec(commands, reply).await,
            Request::Receive { item, reply } => {
                let _ = reply.send(keyspace.receive_item(item));
            }
        }
    }
}

impl<S: OrderedKeyValueStore> Keyspace<S> {
    async fn serve(&mut self, command: Command, reply: ReplySender) {
        tracing::debug!(db = self.index, %command, "request");
        if self.notifier.notify(self.index, &command).is_err() {
            let _ = reply.send(Err(EdisError::NotifyFailed));
            return;
        }
        match self.run_one(&command).await {
            Ok(Verdict::Reply(result)) => {
                self.stamp(&command);
                let pushed: Vec<Vec<u8>> =
                    pushed_keys(&command).into_iter().map(<[u8]>::to_vec).collect();
                let _ = reply.send(Ok(result));
                self.serve_pushes(pushed);
            }
            Ok(Verdict::Park { keys, deadline }) => {
                self.blocked.park(keys, deadline, command, reply);
            }
            Err(error) => {
                if let EdisError::Unexpected(ref message) = error {
                    tracing::warn!(db = self.index, %message, "unexpected request");
                }
                let _ = reply.send(Err(error));
            }
        }
    }

    async fn serve_exec(&mut self, commands: Vec<Command>, reply: ReplySender) {
        let envelope = Command::new("EXEC", Vec::new());
        if self.notifier.notify(self.index, &envelope).is_err() {
            let _ = reply.send(Err(EdisError::NotifyFailed));
            return;
        }
        let mut slots = Vec::with_capacity(commands.len());
        for command in &commands {
            match self.run_one(command).await {
                Ok(Verdict::Reply(result)) => {
                    self.stamp(command);
                    let pushed: Vec<Vec<u8>> =
                        pushed_keys(command).into_iter().map(<[u8]>::to_vec).collect();
                    slots.push(Ok(result));
                    self.serve_pushes(pushed);
                }
                // a command that would block records an empty slot
                Ok(Verdict::Park { .. }) => slots.push(Ok(Reply::Nil)),
                Err(error) => slots.push(Err(error)),
            }
        }
        let _ = reply.send(Ok(Reply::Multi(slots)));
    }

    /// `MOVE` awaits on the destination shard, so it is routed here instead
    /// of the synchronous dispatch table.
    async fn run_one(&mut self, command: &Command) -> Result<Verdict, EdisError> {
        if command.name == "MOVE" {
            self.move_key(command).await.map(Verdict::Reply)
        } else {
            self.dispatch(command)
        }
    }

    /// Two-message protocol: read source, hand to the destination actor,
    /// delete source. An occupied destination reports false; a failed source
    /// delete is compensated by deleting the copy in the destination.
    async fn move_key(&mut self, command: &Command) -> Result<Reply, EdisError> {
        crate::core::commands::check_arity(command, 2)?;
        let key = &command.args[0];
        let destination = crate::core::commands::int_arg(&command.args[1])?;
        let destination = usize::try_from(destination).map_err(|_| EdisError::OutOfRange)?;
        if destination == self.index {
            return Err(EdisError::OutOfRange);
        }
        let Some(peer) = self.peers.get(destination).cloned() else {
            return Err(EdisError::OutOfRange);
        };
        let Some(item) = self.get_item(TypeSelector::Any, key)? else {
            return Ok(Reply::Bool(false));
        };
        match peer.receive(item).await {
            Ok(_) => {
                if let Err(error) = self.store.delete(key) {
                    let _ = peer
                        .run(Command::new("DEL", vec![key.clone()]), MOVE_TIMEOUT)
                        .await;
                    return Err(error);
                }
                Ok(Reply::Bool(true))
            }
            Err(EdisError::Found) => Ok(Reply::Bool(false)),
            Err(error) => Err(error),
        }
    }

    fn receive_item(&mut self, item: Item) -> Result<Reply, EdisError> {
        if self.exists_item(&item.key)? {
            return Err(EdisError::Found);
        }
        self.put_item(&item)?;
        Ok(Reply::Ok)
    }

    /// Serves parked waiters after pushes landed on `initial` keys. A woken
    /// BRPOPLPUSH pushes into its destination, so freshly pushed keys join
    /// the worklist instead of recursing.
    fn serve_pushes(&mut self, initial: Vec<Vec<u8>>) {
        let mut pending: VecDeque<Vec<u8>> = initial.into();
        while let Some(key) = pending.pop_front() {
            loop {
                let Some(waiter) = self.blocked.front(&key) else { break };
                if waiter.is_dead() {
                    self.blocked.remove(&waiter);
                    continue;
                }
                if waiter.expired(Instant::now()) {
                    self.blocked.remove(&waiter);
                    waiter.fulfill(Ok(Reply::Nil));
                    continue;
                }
                match self.retry_blocked(&waiter.command) {
                    Ok(Some((result, pushed))) => {
                        self.blocked.remove(&waiter);
                        self.stamp(&waiter.command);
                        waiter.fulfill(Ok(result));
                        pending.extend(pushed);
                    }
                    // still nothing for this waiter; later ones cannot be
                    // served ahead of it
                    Ok(None) => break,
                    Err(error) => {
                        self.blocked.remove(&waiter);
                        waiter.fulfill(Err(error));
                    }
                }
            }
        }
    }

    /// Re-executes a parked command non-blockingly. `Ok(None)` means it still
    /// finds nothing and the waiter stays in place.
    fn retry_blocked(
        &mut self,
        command: &Command,
    ) -> Result<Option<(Reply, Vec<Vec<u8>>)>, EdisError> {
        match command.name.as_str() {
            "BLPOP" | "BRPOP" => {
                let back = command.name == "BRPOP";
                if command.args.is_empty() {
                    return Ok(None);
                }
                let keys = &command.args[..command.args.len() - 1];
                for key in keys {
                    if let Some(value) = self.list_pop(key, back)? {
                        let reply =
                            Reply::Array(vec![Reply::Bulk(key.clone()), Reply::Bulk(value)]);
                        return Ok(Some((reply, Vec::new())));
                    }
                }
                Ok(None)
            }
            "BRPOPLPUSH" => {
                if command.args.len() < 2 {
                    return Ok(None);
                }
                match self.rpoplpush_logic(&command.args[0], &command.args[1]) {
                    Ok(value) => {
                        Ok(Some((Reply::Bulk(value), vec![command.args[1].clone()])))
                    }
                    Err(EdisError::NotFound) => Ok(None),
                    Err(error) => Err(error),
                }
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::notify::TracingNotifier;
    use tempfile::TempDir;

    const T: Duration = Duration::from_secs(5);

    fn cmd(name: &str, args: &[&str]) -> Command {
        Command::new(name, args.iter().map(|a| a.as_bytes().to_vec()).collect())
    }

    fn bulk(text: &str) -> Reply {
        Reply::Bulk(text.as_bytes().to_vec())
    }

    fn server(databases: usize) -> (TempDir, Edis) {
        let dir = TempDir::new().unwrap();
        let config = Config { data_dir: dir.path().to_path_buf(), databases };
        let edis = Edis::open(&config, Arc::new(TracingNotifier)).unwrap();
        (dir, edis)
    }

    #[tokio::test]
    async fn shards_are_isolated() {
        let (_dir, edis) = server(2);
        let db0 = edis.db(0).unwrap();
        let db1 = edis.db(1).unwrap();
        db0.run(cmd("SET", &["k", "v"]), T).await.unwrap();
        assert_eq!(db0.run(cmd("GET", &["k"]), T).await.unwrap(), bulk("v"));
        assert_eq!(db1.run(cmd("GET", &["k"]), T).await.unwrap(), Reply::Nil);
    }

    #[tokio::test]
    async fn blpop_suspends_until_a_push_arrives() {
        let (_dir, edis) = server(1);
        let db = edis.db(0).unwrap().clone();

        let waiter = tokio::spawn({
            let db = db.clone();
            async move { db.run(cmd("BLPOP", &["q", "10"]), T).await }
        });
        // let the waiter park
        tokio::time::sleep(Duration::from_millis(100)).await;
        db.run(cmd("LPUSH", &["q", "a"]), T).await.unwrap();
        db.run(cmd("LPUSH", &["q", "b"]), T).await.unwrap();
        db.run(cmd("LPUSH", &["q", "c"]), T).await.unwrap();

        // the earliest push woke the waiter with (q, a)
        let woken = waiter.await.unwrap().unwrap();
        assert_eq!(woken, Reply::Array(vec![bulk("q"), bulk("a")]));
        assert_eq!(
            db.run(cmd("LRANGE", &["q", "0", "-1"]), T).await.unwrap(),
            Reply::Array(vec![bulk("c"), bulk("b")])
        );
    }

    #[tokio::test]
    async fn blocked_waiters_wake_fifo() {
        let (_dir, edis) = server(1);
        let db = edis.db(0).unwrap().clone();

        let first = tokio::spawn({
            let db = db.clone();
            async move { db.run(cmd("BLPOP", &["q", "10"]), T).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = tokio::spawn({
            let db = db.clone();
            async move { db.run(cmd("BLPOP", &["q", "10"]), T).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        // one value: only the earlier waiter wins
        db.run(cmd("RPUSH", &["q", "one"]), T).await.unwrap();
        assert_eq!(
            first.await.unwrap().unwrap(),
            Reply::Array(vec![bulk("q"), bulk("one")])
        );
        assert!(!second.is_finished());

        db.run(cmd("RPUSH", &["q", "two"]), T).await.unwrap();
        assert_eq!(
            second.await.unwrap().unwrap(),
            Reply::Array(vec![bulk("q"), bulk("two")])
        );
    }

    #[tokio::test]
    async fn expired_waiter_receives_an_empty_reply() {
        let (_dir, edis) = server(1);
        let db = edis.db(0).unwrap().clone();
        let waiter = tokio::spawn({
            let db = db.clone();
            async move { db.run(cmd("BLPOP", &["q", "1"]), T).await }
        });
        tokio::time::sleep(Duration::from_millis(1200)).await;
        // any request sweeps deadline-elapsed waiters
        db.run(cmd("PING", &[]), T).await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), Reply::Nil);
    }

    #[tokio::test]
    async fn disconnected_waiter_is_dropped_not_served() {
        let (_dir, edis) = server(1);
        let db = edis.db(0).unwrap().clone();
        let doomed = tokio::spawn({
            let db = db.clone();
            async move { db.run(cmd("BLPOP", &["q", "10"]), T).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        doomed.abort();
        tokio::time::sleep(Duration::from_millis(50)).await;

        db.run(cmd("LPUSH", &["q", "v"]), T).await.unwrap();
        // the dead caller consumed nothing
        assert_eq!(
            db.run(cmd("LRANGE", &["q", "0", "-1"]), T).await.unwrap(),
            Reply::Array(vec![bulk("v")])
        );
    }

    #[tokio::test]
    async fn brpoplpush_wakes_and_lands_in_the_destination() {
        let (_dir, edis) = server(1);
        let db = edis.db(0).unwrap().clone();
        let waiter = tokio::spawn({
            let db = db.clone();
            async move { db.run(cmd("BRPOPLPUSH", &["src", "dst", "10"]), T).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        db.run(cmd("RPUSH", &["src", "v"]), T).await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), bulk("v"));
        assert_eq!(
            db.run(cmd("LRANGE", &["dst", "0", "-1"]), T).await.unwrap(),
            Reply::Array(vec![bulk("v")])
        );
        assert_eq!(db.run(cmd("EXISTS", &["src"]), T).await.unwrap(), Reply::Bool(false));
    }

    #[tokio::test]
    async fn exec_collects_one_slot_per_command() {
        let (_dir, edis) = server(1);
        let db = edis.db(0).unwrap();
        let batch = vec![
            cmd("SET", &["k", "v"]),
            cmd("GET", &["k"]),
            // would block: records an empty slot and execution continues
            cmd("BLPOP", &["empty", "1"]),
            // per-slot error does not fail the batch
            cmd("INCR", &["k"]),
            cmd("GET", &["k"]),
        ];
        let reply = db.exec(batch, T).await.unwrap();
        assert_eq!(
            reply,
            Reply::Multi(vec![
                Ok(Reply::Ok),
                Ok(bulk("v")),
                Ok(Reply::Nil),
                Err(EdisError::NotInteger),
                Ok(bulk("v")),
            ])
        );
    }

    #[tokio::test]
    async fn move_relocates_a_key_between_shards() {
        let (_dir, edis) = server(2);
        let db0 = edis.db(0).unwrap();
        let db1 = edis.db(1).unwrap();
        db0.run(cmd("SET", &["k", "v"]), T).await.unwrap();

        assert_eq!(db0.run(cmd("MOVE", &["k", "1"]), T).await.unwrap(), Reply::Bool(true));
        assert_eq!(db0.run(cmd("GET", &["k"]), T).await.unwrap(), Reply::Nil);
        assert_eq!(db1.run(cmd("GET", &["k"]), T).await.unwrap(), bulk("v"));

        // moving a missing key reports false
        assert_eq!(db0.run(cmd("MOVE", &["k", "1"]), T).await.unwrap(), Reply::Bool(false));

        // an occupied destination reports false and leaves the source alone
        db0.run(cmd("SET", &["k", "other"]), T).await.unwrap();
        assert_eq!(db0.run(cmd("MOVE", &["k", "1"]), T).await.unwrap(), Reply::Bool(false));
        assert_eq!(db0.run(cmd("GET", &["k"]), T).await.unwrap(), bulk("other"));

        // the shard itself is not a destination
        assert_eq!(
            db0.run(cmd("MOVE", &["k", "0"]), T).await.unwrap_err(),
            EdisError::OutOfRange
        );
    }

    #[tokio::test]
    async fn rejected_notification_aborts_the_command() {
        struct RejectingNotifier;
        impl CommandNotifier for RejectingNotifier {
            fn notify(&self, _db: usize, _command: &Command) -> Result<(), EdisError> {
                Err(EdisError::Unexpected("bus down".to_string()))
            }
        }
        let dir = TempDir::new().unwrap();
        let config = Config { data_dir: dir.path().to_path_buf(), databases: 1 };
        let edis = Edis::open(&config, Arc::new(RejectingNotifier)).unwrap();
        let db = edis.db(0).unwrap();
        assert_eq!(
            db.run(cmd("SET", &["k", "v"]), T).await.unwrap_err(),
            EdisError::NotifyFailed
        );
    }

    #[tokio::test]
    async fn unknown_commands_fail_the_request_not_the_actor() {
        let (_dir, edis) = server(1);
        let db = edis.db(0).unwrap();
        assert!(matches!(
            db.run(cmd("NOSUCH", &[]), T).await.unwrap_err(),
            EdisError::Unexpected(_)
        ));
        // the actor is still alive and serving
        assert_eq!(db.run(cmd("PING", &[]), T).await.unwrap(), Reply::Simple("PONG".to_string()));
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let config = Config { data_dir: dir.path().to_path_buf(), databases: 1 };
        {
            let edis = Edis::open(&config, Arc::new(TracingNotifier)).unwrap();
            let db = edis.db(0).unwrap();
            db.run(cmd("SET", &["durable", "yes"]), T).await.unwrap();
        }
        let edis = Edis::open(&config, Arc::new(TracingNotifier)).unwrap();
        let db = edis.db(0).unwrap();
        assert_eq!(db.run(cmd("GET", &["durable"]), T).await.unwrap(), bulk("yes"));
    }
}
