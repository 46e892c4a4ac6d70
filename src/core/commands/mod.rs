//! Command vocabulary and dispatch.
//!
//! A [`Command`] is the envelope handed over by the dispatcher: an uppercased
//! name plus untyped byte-string arguments; handlers coerce arguments as they
//! go. Replies are native values ([`Reply`]); the wire encoding is not this
//! crate's concern.

pub mod hashes;
pub mod keys;
pub mod lists;
pub mod server;
pub mod sets;
pub mod strings;
pub mod zsets;

use crate::core::common::EdisError;
use crate::core::keyspace::Keyspace;
use crate::core::storage::engine::OrderedKeyValueStore;
use std::fmt;
use std::time::Instant;

/// One client command as delivered by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Uppercase command name.
    pub name: String,
    /// Raw byte-string arguments, in wire order.
    pub args: Vec<Vec<u8>>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<Vec<u8>>) -> Command {
        Command { name: name.into().to_ascii_uppercase(), args }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.args.len())
    }
}

/// A native-value reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Plain acknowledgement.
    Ok,
    /// Absent value / no result.
    Nil,
    Integer(i64),
    Float(f64),
    Bool(bool),
    /// Byte-string payload.
    Bulk(Vec<u8>),
    /// Status strings such as `PONG` or a type name.
    Simple(String),
    Array(Vec<Reply>),
    /// `EXEC` batch: one result slot per command.
    Multi(Vec<Result<Reply, EdisError>>),
}

/// Outcome of dispatching one command inside the actor.
#[derive(Debug)]
pub(crate) enum Verdict {
    Reply(Reply),
    /// Blocking command found nothing; park the caller on these keys.
    Park { keys: Vec<Vec<u8>>, deadline: Option<Instant> },
}

impl<S: OrderedKeyValueStore> Keyspace<S> {
    /// Routes one command to its handler. `MOVE` is absent here: it awaits on
    /// the destination shard and is dispatched by the actor loop instead.
    pub(crate) fn dispatch(&mut self, command: &Command) -> Result<Verdict, EdisError> {
        let reply = match command.name.as_str() {
            // strings
            "APPEND" => self.append(command),
            "DECR" => self.decr(command),
            "DECRBY" => self.decrby(command),
            "GET" => self.get(command),
            "GETBIT" => self.getbit(command),
            "GETRANGE" => self.getrange(command),
            "GETSET" => self.getset(command),
            "INCR" => self.incr(command),
            "INCRBY" => self.incrby(command),
            "MGET" => self.mget(command),
            "MSET" => self.mset(command),
            "MSETNX" => self.msetnx(command),
            "SET" => self.set(command),
            "SETBIT" => self.setbit(command),
            "SETEX" => self.setex(command),
            "SETNX" => self.setnx(command),
            "SETRANGE" => self.setrange(command),
            "STRLEN" => self.strlen(command),
            // keys
            "DEL" => self.del(command),
            "EXISTS" => self.exists(command),
            "EXPIRE" => self.expire(command),
            "EXPIREAT" => self.expireat(command),
            "KEYS" => self.keys(command),
            "OBJECT" => self.object(command),
            "PERSIST" => self.persist(command),
            "RANDOMKEY" => self.randomkey(command),
            "RENAME" => self.rename(command),
            "RENAMENX" => self.renamenx(command),
            "TTL" => self.ttl(command),
            "TYPE" => self.type_of(command),
            // hashes
            "HDEL" => self.hdel(command),
            "HEXISTS" => self.hexists(command),
            "HGET" => self.hget(command),
            "HGETALL" => self.hgetall(command),
            "HINCRBY" => self.hincrby(command),
            "HKEYS" => self.hkeys(command),
            "HLEN" => self.hlen(command),
            "HMGET" => self.hmget(command),
            "HMSET" => self.hmset(command),
            "HSET" => self.hset(command),
            "HSETNX" => self.hsetnx(command),
            "HVALS" => self.hvals(command),
            // lists (the blocking three return verdicts directly)
            "BLPOP" => return self.blpop(command, false),
            "BRPOP" => return self.blpop(command, true),
            "BRPOPLPUSH" => return self.brpoplpush(command),
            "LINDEX" => self.lindex(command),
            "LINSERT" => self.linsert(command),
            "LLEN" => self.llen(command),
            "LPOP" => self.lpop(command),
            "LPUSH" => self.lpush(command),
            "LPUSHX" => self.lpushx(command),
            "LRANGE" => self.lrange(command),
            "LREM" => self.lrem(command),
            "LSET" => self.lset(command),
            "LTRIM" => self.ltrim(command),
            "RPOP" => self.rpop(command),
            "RPOPLPUSH" => self.rpoplpush(command),
            "RPUSH" => self.rpush(command),
            "RPUSHX" => self.rpushx(command),
            // sets
            "SADD" => self.sadd(command),
            "SCARD" => self.scard(command),
            "SDIFF" => self.sdiff(command),
            "SDIFFSTORE" => self.sdiffstore(command),
            "SINTER" => self.sinter(command),
            "SINTERSTORE" => self.sinterstore(command),
            "SISMEMBER" => self.sismember(command),
            "SMEMBERS" => self.smembers(command),
            "SMOVE" => self.smove(command),
            "SPOP" => self.spop(command),
            "SRANDMEMBER" => self.srandmember(command),
            "SREM" => self.srem(command),
            "SUNION" => self.sunion(command),
            "SUNIONSTORE" => self.sunionstore(command),
            // sorted sets
            "ZADD" => self.zadd(command),
            "ZCARD" => self.zcard(command),
            "ZCOUNT" => self.zcount(command),
            "ZINCRBY" => self.zincrby(command),
            "ZINTERSTORE" => self.zinterstore(command),
            "ZRANGE" => self.zrange(command),
            "ZRANGEBYSCORE" => self.zrangebyscore(command),
            "ZRANK" => self.zrank(command),
            "ZREM" => self.zrem(command),
            "ZREMRANGEBYRANK" => self.zremrangebyrank(command),
            "ZREMRANGEBYSCORE" => self.zremrangebyscore(command),
            "ZREVRANGE" => self.zrevrange(command),
            "ZREVRANGEBYSCORE" => self.zrevrangebyscore(command),
            "ZREVRANK" => self.zrevrank(command),
            "ZSCORE" => self.zscore(command),
            "ZUNIONSTORE" => self.zunionstore(command),
            // server
            "DBSIZE" => self.dbsize(command),
            "ECHO" => self.echo(command),
            "FLUSHDB" => self.flushdb(command),
            "INFO" => self.info(command),
            "LASTSAVE" => self.lastsave(command),
            "PING" => self.ping(command),
            "SAVE" => self.save(command),
            "MOVE" => Err(EdisError::Unexpected(
                "MOVE requires the actor context".to_string(),
            )),
            other => Err(EdisError::Unexpected(format!("unknown command '{other}'"))),
        };
        reply.map(Verdict::Reply)
    }
}

/// Exact-arity check; reports `unexpected_request` otherwise.
pub(crate) fn check_arity(command: &Command, expected: usize) -> Result<(), EdisError> {
    if command.args.len() == expected {
        Ok(())
    } else {
        Err(wrong_arity(command))
    }
}

/// At-least-arity check for variadic commands.
pub(crate) fn check_arity_min(command: &Command, minimum: usize) -> Result<(), EdisError> {
    if command.args.len() >= minimum {
        Ok(())
    } else {
        Err(wrong_arity(command))
    }
}

fn wrong_arity(command: &Command) -> EdisError {
    EdisError::Unexpected(format!("wrong number of arguments for '{}'", command.name))
}

/// Coerces a byte-string argument into a signed integer.
pub(crate) fn int_arg(raw: &[u8]) -> Result<i64, EdisError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(EdisError::NotInteger)
}

/// Coerces a byte-string argument into a finite float.
pub(crate) fn float_arg(raw: &[u8]) -> Result<f64, EdisError> {
    let value = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or(EdisError::NotFloat)?;
    if value.is_nan() {
        return Err(EdisError::NotFloat);
    }
    Ok(value)
}

/// Normalizes an inclusive `[start, stop]` window over a sequence of `len`
/// elements. Negative indices count from the end. Returns `None` when the
/// window is empty.
pub(crate) fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { (len + stop).max(0) } else { stop.min(len - 1) };
    if start >= len || start > stop {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Normalizes a single index; negative counts from the end.
pub(crate) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { len + index } else { index };
    if (0..len).contains(&index) {
        Some(index as usize)
    } else {
        None
    }
}

/// User-visible keys a command touches; used for access stamping.
pub(crate) fn command_keys(command: &Command) -> Vec<&[u8]> {
    let args = &command.args;
    let first = || args.first().map(Vec::as_slice).into_iter().collect::<Vec<_>>();
    let pair = || args.iter().take(2).map(Vec::as_slice).collect::<Vec<_>>();
    let all = || args.iter().map(Vec::as_slice).collect::<Vec<_>>();
    match command.name.as_str() {
        "APPEND" | "DECR" | "DECRBY" | "GET" | "GETBIT" | "GETRANGE" | "GETSET" | "INCR"
        | "INCRBY" | "SET" | "SETBIT" | "SETEX" | "SETNX" | "SETRANGE" | "STRLEN" | "EXISTS"
        | "EXPIRE" | "EXPIREAT" | "PERSIST" | "TTL" | "TYPE" | "MOVE" | "HDEL" | "HEXISTS"
        | "HGET" | "HGETALL" | "HINCRBY" | "HKEYS" | "HLEN" | "HMGET" | "HMSET" | "HSET"
        | "HSETNX" | "HVALS" | "LINDEX" | "LINSERT" | "LLEN" | "LPOP" | "LPUSH" | "LPUSHX"
        | "LRANGE" | "LREM" | "LSET" | "LTRIM" | "RPOP" | "RPUSH" | "RPUSHX" | "SADD"
        | "SCARD" | "SISMEMBER" | "SMEMBERS" | "SPOP" | "SRANDMEMBER" | "SREM" | "ZADD"
        | "ZCARD" | "ZCOUNT" | "ZINCRBY" | "ZRANGE" | "ZRANGEBYSCORE" | "ZRANK" | "ZREM"
        | "ZREMRANGEBYRANK" | "ZREMRANGEBYSCORE" | "ZREVRANGE" | "ZREVRANGEBYSCORE"
        | "ZREVRANK" | "ZSCORE" => first(),
        "DEL" | "MGET" | "SDIFF" | "SDIFFSTORE" | "SINTER" | "SINTERSTORE" | "SUNION"
        | "SUNIONSTORE" => all(),
        "RENAME" | "RENAMENX" | "SMOVE" | "RPOPLPUSH" | "BRPOPLPUSH" => pair(),
        "MSET" | "MSETNX" => args.iter().step_by(2).map(Vec::as_slice).collect(),
        "ZINTERSTORE" | "ZUNIONSTORE" => {
            let count = args
                .get(1)
                .and_then(|raw| int_arg(raw).ok())
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(0);
            let mut keys = first();
            keys.extend(args.iter().skip(2).take(count).map(Vec::as_slice));
            keys
        }
        "BLPOP" | "BRPOP" => {
            args.iter().take(args.len().saturating_sub(1)).map(Vec::as_slice).collect()
        }
        "OBJECT" => args.get(1).map(Vec::as_slice).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Destination keys a successful command may have pushed onto; pushes are
/// what wake blocked list waiters.
pub(crate) fn pushed_keys(command: &Command) -> Vec<&[u8]> {
    match command.name.as_str() {
        "LPUSH" | "RPUSH" | "LPUSHX" | "RPUSHX" | "LINSERT" => {
            command.args.first().map(Vec::as_slice).into_iter().collect()
        }
        "RPOPLPUSH" | "BRPOPLPUSH" => command.args.get(1).map(Vec::as_slice).into_iter().collect(),
        _ => Vec::new(),
    }
}
