//! Built-in Commands
//!
//! ### Key Commands
//! - `DEL key [key ...]`, `EXISTS key [key ...]`, `TYPE key`
//! - `EXPIRE key seconds`, `PEXPIRE key milliseconds`, `PEXPIREAT key unix-ms`
//! - `TTL key`, `PTTL key`, `PERSIST key`
//! - `DBSIZE`, `FLUSHDB`
//!
//! ### String Commands
//! - `GET key`
//! - `SET key value [EX seconds | PX milliseconds]`
//!
//! ### List Commands
//! - `LPUSH key value [value ...]`, `RPUSH key value [value ...]`
//! - `LPOP key`, `RPOP key`, `LLEN key`, `LRANGE key start stop`
//!
//! ### Sorted Set Commands
//! - `ZADD key score member [score member ...]`, `ZREM key member [member ...]`
//! - `ZSCORE key member`, `ZCARD key`, `ZRANK key member`, `ZREVRANK key member`
//! - `ZRANGE key start stop [WITHSCORES]`, `ZREVRANGE key start stop [WITHSCORES]`
//! - `ZRANGEBYSCORE key min max [WITHSCORES]`
//!
//! ### Bitmap Commands
//! - `SETBIT key offset 0|1`, `GETBIT key offset`
//!
//! ### Server Commands
//! - `PING [message]`, `BGREWRITEAOF`, `SAVE`

use super::{CommandContext, CommandDescriptor, CommandError, CommandFlags, CommandHandler, CommandResult};
use crate::protocol::Reply;
use crate::storage::{unix_time_ms, Bitmap, Database, ScoreRange, SortedSet, Value};
use bytes::Bytes;
use std::collections::VecDeque;

/// Largest accepted `SETBIT`/`GETBIT` offset (a 512 MB bitmap).
const MAX_BIT_OFFSET: u64 = 4 * 1024 * 1024 * 1024 - 1;

const fn command(
    name: &'static str,
    arity: i32,
    flags: CommandFlags,
    handler: CommandHandler,
) -> CommandDescriptor {
    CommandDescriptor {
        name,
        arity,
        flags,
        handler,
    }
}

/// Returns the descriptor of every built-in command.
pub fn builtin_commands() -> Vec<CommandDescriptor> {
    use CommandFlags as F;
    vec![
        // Keys
        command("del", -2, F::WRITE, cmd_del),
        command("exists", -2, F::READONLY, cmd_exists),
        command("type", 2, F::READONLY, cmd_type),
        command("expire", 3, F::WRITE, cmd_expire),
        command("pexpire", 3, F::WRITE, cmd_pexpire),
        command("pexpireat", 3, F::WRITE, cmd_pexpireat),
        command("ttl", 2, F::READONLY, cmd_ttl),
        command("pttl", 2, F::READONLY, cmd_pttl),
        command("persist", 2, F::WRITE, cmd_persist),
        command("dbsize", 1, F::READONLY, cmd_dbsize),
        command("flushdb", 1, F::WRITE, cmd_flushdb),
        // Strings
        command("get", 2, F::READONLY, cmd_get),
        command("set", -3, F::WRITE, cmd_set),
        // Lists
        command("lpush", -3, F::WRITE, cmd_lpush),
        command("rpush", -3, F::WRITE, cmd_rpush),
        command("lpop", 2, F::WRITE, cmd_lpop),
        command("rpop", 2, F::WRITE, cmd_rpop),
        command("llen", 2, F::READONLY, cmd_llen),
        command("lrange", 4, F::READONLY, cmd_lrange),
        // Sorted sets
        command("zadd", -4, F::WRITE, cmd_zadd),
        command("zrem", -3, F::WRITE, cmd_zrem),
        command("zscore", 3, F::READONLY, cmd_zscore),
        command("zcard", 2, F::READONLY, cmd_zcard),
        command("zrank", 3, F::READONLY, cmd_zrank),
        command("zrevrank", 3, F::READONLY, cmd_zrevrank),
        command("zrange", -4, F::READONLY, cmd_zrange),
        command("zrevrange", -4, F::READONLY, cmd_zrevrange),
        command("zrangebyscore", -4, F::READONLY, cmd_zrangebyscore),
        // Bitmaps
        command("setbit", 4, F::WRITE, cmd_setbit),
        command("getbit", 3, F::READONLY, cmd_getbit),
        // Server
        command("ping", -1, F::NONE, cmd_ping),
        command("bgrewriteaof", 1, F::ADMIN, cmd_bgrewriteaof),
        command("save", 1, F::ADMIN, cmd_save),
    ]
}

// ========================================================================
// Helper functions
// ========================================================================

fn parse_i64(arg: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotInteger)
}

/// Parses a score. Accepts `inf`, `+inf` and `-inf`; rejects NaN.
fn parse_f64(arg: &[u8]) -> Result<f64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| !v.is_nan())
        .ok_or(CommandError::NotFloat)
}

/// Parses one end of a score range; a leading `(` makes it exclusive.
fn parse_range_bound(arg: &[u8]) -> Result<(f64, bool), CommandError> {
    let (exclusive, digits) = match arg.split_first() {
        Some((b'(', rest)) => (true, rest),
        _ => (false, arg),
    };
    let value = parse_f64(digits).map_err(|_| CommandError::RangeNotFloat)?;
    Ok((value, exclusive))
}

fn parse_bit_offset(arg: &[u8]) -> Result<usize, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|&offset| offset <= MAX_BIT_OFFSET)
        .map(|offset| offset as usize)
        .ok_or(CommandError::BitOffset)
}

/// Checks for a trailing `WITHSCORES` at `args[at]`.
fn parse_withscores(args: &[Bytes], at: usize) -> Result<bool, CommandError> {
    match args.len() {
        n if n == at => Ok(false),
        n if n == at + 1 && args[at].eq_ignore_ascii_case(b"withscores") => Ok(true),
        _ => Err(CommandError::Syntax),
    }
}

/// Turns Redis-style start/stop positions into a clamped index range.
fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn scored_array(items: Vec<(Bytes, f64)>, withscores: bool) -> Reply {
    let mut out = Vec::with_capacity(items.len() * if withscores { 2 } else { 1 });
    for (member, score) in items {
        out.push(Reply::Bulk(member));
        if withscores {
            out.push(Reply::score(score));
        }
    }
    Reply::Array(out)
}

fn read_string<'a>(db: &'a mut Database, key: &[u8]) -> Result<Option<&'a Bytes>, CommandError> {
    match db.lookup(key).map(|v| v.as_ref()) {
        None => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn read_list<'a>(
    db: &'a mut Database,
    key: &[u8],
) -> Result<Option<&'a VecDeque<Bytes>>, CommandError> {
    match db.lookup(key).map(|v| v.as_ref()) {
        None => Ok(None),
        Some(Value::List(list)) => Ok(Some(list)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn write_list<'a>(
    db: &'a mut Database,
    key: &[u8],
) -> Result<Option<&'a mut VecDeque<Bytes>>, CommandError> {
    match db.lookup_mut(key) {
        None => Ok(None),
        Some(Value::List(list)) => Ok(Some(list)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn read_zset<'a>(db: &'a mut Database, key: &[u8]) -> Result<Option<&'a SortedSet>, CommandError> {
    match db.lookup(key).map(|v| v.as_ref()) {
        None => Ok(None),
        Some(Value::SortedSet(zset)) => Ok(Some(zset)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn write_zset<'a>(
    db: &'a mut Database,
    key: &[u8],
) -> Result<Option<&'a mut SortedSet>, CommandError> {
    match db.lookup_mut(key) {
        None => Ok(None),
        Some(Value::SortedSet(zset)) => Ok(Some(zset)),
        Some(_) => Err(CommandError::WrongType),
    }
}

// ========================================================================
// Key Commands
// ========================================================================

/// DEL key [key ...]
fn cmd_del(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    let deleted = args[1..].iter().filter(|key| ctx.db.remove(key)).count();
    Ok(Reply::integer(deleted as i64))
}

/// EXISTS key [key ...]
fn cmd_exists(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    let count = args[1..].iter().filter(|key| ctx.db.exists(key)).count();
    Ok(Reply::integer(count as i64))
}

/// TYPE key
fn cmd_type(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    let name = ctx
        .db
        .lookup(&args[1])
        .map(|v| v.type_name())
        .unwrap_or("none");
    Ok(Reply::status(name))
}

fn expire_generic(ctx: &mut CommandContext<'_>, key: &[u8], when_ms: i64) -> CommandResult {
    Ok(Reply::integer(ctx.db.set_expire(key, when_ms) as i64))
}

/// EXPIRE key seconds
fn cmd_expire(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    let ms = parse_i64(&args[2])?
        .checked_mul(1000)
        .ok_or(CommandError::NotInteger)?;
    expire_generic(ctx, &args[1], unix_time_ms().saturating_add(ms))
}

/// PEXPIRE key milliseconds
fn cmd_pexpire(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    let ms = parse_i64(&args[2])?;
    expire_generic(ctx, &args[1], unix_time_ms().saturating_add(ms))
}

/// PEXPIREAT key unix-time-milliseconds
fn cmd_pexpireat(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    let when = parse_i64(&args[2])?;
    expire_generic(ctx, &args[1], when)
}

/// Remaining time to live in milliseconds: -2 if the key does not exist,
/// -1 if it has no TTL.
fn ttl_ms(db: &mut Database, key: &[u8]) -> i64 {
    if !db.exists(key) {
        return -2;
    }
    match db.get_expire(key) {
        Some(when) => (when - unix_time_ms()).max(0),
        None => -1,
    }
}

/// TTL key
fn cmd_ttl(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    let ms = ttl_ms(ctx.db, &args[1]);
    let secs = if ms < 0 { ms } else { (ms + 500) / 1000 };
    Ok(Reply::integer(secs))
}

/// PTTL key
fn cmd_pttl(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    Ok(Reply::integer(ttl_ms(ctx.db, &args[1])))
}

/// PERSIST key
fn cmd_persist(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    Ok(Reply::integer(ctx.db.persist(&args[1]) as i64))
}

/// DBSIZE
fn cmd_dbsize(ctx: &mut CommandContext<'_>, _args: &[Bytes]) -> CommandResult {
    Ok(Reply::integer(ctx.db.len() as i64))
}

/// FLUSHDB
fn cmd_flushdb(ctx: &mut CommandContext<'_>, _args: &[Bytes]) -> CommandResult {
    ctx.db.clear();
    Ok(Reply::Ok)
}

// ========================================================================
// String Commands
// ========================================================================

/// GET key
fn cmd_get(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    let value = read_string(ctx.db, &args[1])?.cloned();
    Ok(Reply::bulk_or_nil(value))
}

/// SET key value [EX seconds | PX milliseconds]
fn cmd_set(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    let mut ttl_ms: Option<i64> = None;

    let mut i = 3;
    while i < args.len() {
        let opt = &args[i];
        let is_ex = opt.eq_ignore_ascii_case(b"ex");
        if !(is_ex || opt.eq_ignore_ascii_case(b"px")) || ttl_ms.is_some() {
            return Err(CommandError::Syntax);
        }
        let raw = args.get(i + 1).ok_or(CommandError::Syntax)?;
        let amount = parse_i64(raw)?;
        if amount <= 0 {
            return Err(CommandError::InvalidExpire("set"));
        }
        let ms = if is_ex {
            amount
                .checked_mul(1000)
                .ok_or(CommandError::InvalidExpire("set"))?
        } else {
            amount
        };
        ttl_ms = Some(ms);
        i += 2;
    }

    let key = args[1].clone();
    ctx.db.insert(key.clone(), Value::Str(args[2].clone()));
    if let Some(ms) = ttl_ms {
        ctx.db.set_expire(&key, unix_time_ms().saturating_add(ms));
    }
    Ok(Reply::Ok)
}

// ========================================================================
// List Commands
// ========================================================================

fn push_generic(ctx: &mut CommandContext<'_>, args: &[Bytes], front: bool) -> CommandResult {
    let push = |list: &mut VecDeque<Bytes>| {
        for value in &args[2..] {
            if front {
                list.push_front(value.clone());
            } else {
                list.push_back(value.clone());
            }
        }
        list.len()
    };

    let len = match write_list(ctx.db, &args[1])? {
        Some(list) => push(list),
        None => {
            let mut list = VecDeque::with_capacity(args.len() - 2);
            let len = push(&mut list);
            ctx.db.insert(args[1].clone(), Value::List(list));
            len
        }
    };
    Ok(Reply::integer(len as i64))
}

/// LPUSH key value [value ...]
fn cmd_lpush(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    push_generic(ctx, args, true)
}

/// RPUSH key value [value ...]
fn cmd_rpush(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    push_generic(ctx, args, false)
}

fn pop_generic(ctx: &mut CommandContext<'_>, key: &[u8], front: bool) -> CommandResult {
    let (value, now_empty) = match write_list(ctx.db, key)? {
        Some(list) => {
            let value = if front { list.pop_front() } else { list.pop_back() };
            (value, list.is_empty())
        }
        None => return Ok(Reply::Nil),
    };
    if now_empty {
        ctx.db.remove(key);
    }
    Ok(Reply::bulk_or_nil(value))
}

/// LPOP key
fn cmd_lpop(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    pop_generic(ctx, &args[1], true)
}

/// RPOP key
fn cmd_rpop(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    pop_generic(ctx, &args[1], false)
}

/// LLEN key
fn cmd_llen(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    let len = read_list(ctx.db, &args[1])?.map_or(0, |l| l.len());
    Ok(Reply::integer(len as i64))
}

/// LRANGE key start stop
fn cmd_lrange(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    let start = parse_i64(&args[2])?;
    let stop = parse_i64(&args[3])?;
    let Some(list) = read_list(ctx.db, &args[1])? else {
        return Ok(Reply::Array(Vec::new()));
    };
    let items = match normalize_range(start, stop, list.len()) {
        Some((from, to)) => list
            .range(from..=to)
            .map(|v| Reply::Bulk(v.clone()))
            .collect(),
        None => Vec::new(),
    };
    Ok(Reply::Array(items))
}

// ========================================================================
// Sorted Set Commands
// ========================================================================

/// ZADD key score member [score member ...]
fn cmd_zadd(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    if (args.len() - 2) % 2 != 0 {
        return Err(CommandError::Syntax);
    }
    // Parse every score before touching the keyspace.
    let mut pairs = Vec::with_capacity((args.len() - 2) / 2);
    for chunk in args[2..].chunks(2) {
        pairs.push((parse_f64(&chunk[0])?, chunk[1].clone()));
    }

    let apply = |zset: &mut SortedSet| {
        pairs
            .iter()
            .filter(|(score, member)| zset.insert(member.clone(), *score))
            .count()
    };

    let added = match write_zset(ctx.db, &args[1])? {
        Some(zset) => apply(zset),
        None => {
            let mut zset = SortedSet::new();
            let added = apply(&mut zset);
            ctx.db.insert(args[1].clone(), Value::SortedSet(zset));
            added
        }
    };
    Ok(Reply::integer(added as i64))
}

/// ZREM key member [member ...]
fn cmd_zrem(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    let (removed, now_empty) = match write_zset(ctx.db, &args[1])? {
        Some(zset) => {
            let removed = args[2..].iter().filter(|m| zset.remove(m)).count();
            (removed, zset.is_empty())
        }
        None => return Ok(Reply::integer(0)),
    };
    if now_empty {
        ctx.db.remove(&args[1]);
    }
    Ok(Reply::integer(removed as i64))
}

/// ZSCORE key member
fn cmd_zscore(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    let score = read_zset(ctx.db, &args[1])?.and_then(|z| z.score(&args[2]));
    Ok(score.map_or(Reply::Nil, Reply::score))
}

/// ZCARD key
fn cmd_zcard(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    let len = read_zset(ctx.db, &args[1])?.map_or(0, |z| z.len());
    Ok(Reply::integer(len as i64))
}

fn rank_generic(ctx: &mut CommandContext<'_>, args: &[Bytes], reverse: bool) -> CommandResult {
    let rank = read_zset(ctx.db, &args[1])?.and_then(|z| z.rank(&args[2], reverse));
    Ok(rank.map_or(Reply::Nil, |r| Reply::integer(r as i64)))
}

/// ZRANK key member
fn cmd_zrank(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    rank_generic(ctx, args, false)
}

/// ZREVRANK key member
fn cmd_zrevrank(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    rank_generic(ctx, args, true)
}

fn range_generic(ctx: &mut CommandContext<'_>, args: &[Bytes], reverse: bool) -> CommandResult {
    let start = parse_i64(&args[2])?;
    let stop = parse_i64(&args[3])?;
    let withscores = parse_withscores(args, 4)?;
    let items = read_zset(ctx.db, &args[1])?
        .map(|z| z.range(start, stop, reverse))
        .unwrap_or_default();
    Ok(scored_array(items, withscores))
}

/// ZRANGE key start stop [WITHSCORES]
fn cmd_zrange(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    range_generic(ctx, args, false)
}

/// ZREVRANGE key start stop [WITHSCORES]
fn cmd_zrevrange(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    range_generic(ctx, args, true)
}

/// ZRANGEBYSCORE key min max [WITHSCORES]
fn cmd_zrangebyscore(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    let (min, min_exclusive) = parse_range_bound(&args[2])?;
    let (max, max_exclusive) = parse_range_bound(&args[3])?;
    let withscores = parse_withscores(args, 4)?;
    let range = ScoreRange {
        min,
        max,
        min_exclusive,
        max_exclusive,
    };
    let items = read_zset(ctx.db, &args[1])?
        .map(|z| z.range_by_score(&range))
        .unwrap_or_default();
    Ok(scored_array(items, withscores))
}

// ========================================================================
// Bitmap Commands
// ========================================================================

/// SETBIT key offset 0|1
fn cmd_setbit(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    let offset = parse_bit_offset(&args[2])?;
    let on = match args[3].as_ref() {
        b"1" => true,
        b"0" => false,
        _ => return Err(CommandError::BitValue),
    };

    let old = match ctx.db.lookup_mut(&args[1]) {
        Some(Value::Bitmap(bitmap)) => bitmap.set_bit(offset, on),
        Some(_) => return Err(CommandError::WrongType),
        None => {
            let mut bitmap = Bitmap::new();
            bitmap.set_bit(offset, on);
            ctx.db.insert(args[1].clone(), Value::Bitmap(bitmap));
            false
        }
    };
    Ok(Reply::integer(old as i64))
}

/// GETBIT key offset
fn cmd_getbit(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    let offset = parse_bit_offset(&args[2])?;
    let bit = match ctx.db.lookup(&args[1]).map(|v| v.as_ref()) {
        Some(Value::Bitmap(bitmap)) => bitmap.get_bit(offset),
        Some(_) => return Err(CommandError::WrongType),
        None => false,
    };
    Ok(Reply::integer(bit as i64))
}

// ========================================================================
// Server Commands
// ========================================================================

/// PING [message]
fn cmd_ping(_ctx: &mut CommandContext<'_>, args: &[Bytes]) -> CommandResult {
    match args.len() {
        1 => Ok(Reply::status("PONG")),
        2 => Ok(Reply::Bulk(args[1].clone())),
        _ => Err(CommandError::Syntax),
    }
}

/// BGREWRITEAOF
fn cmd_bgrewriteaof(ctx: &mut CommandContext<'_>, _args: &[Bytes]) -> CommandResult {
    let aof = ctx.aof.as_deref_mut().ok_or(CommandError::AofDisabled)?;
    aof.rewrite_in_background(ctx.db)
        .map_err(|e| CommandError::Failed(e.to_string()))?;
    Ok(Reply::status("Background append only file rewriting started"))
}

/// SAVE: rewrites the append-only file synchronously
fn cmd_save(ctx: &mut CommandContext<'_>, _args: &[Bytes]) -> CommandResult {
    let aof = ctx.aof.as_deref_mut().ok_or(CommandError::AofDisabled)?;
    aof.rewrite_now(ctx.db)
        .map_err(|e| CommandError::Failed(e.to_string()))?;
    Ok(Reply::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandTable;

    struct Harness {
        table: CommandTable,
        db: Database,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                table: CommandTable::new(),
                db: Database::new(),
            }
        }

        fn run(&mut self, parts: &[&str]) -> Reply {
            let args: Vec<Bytes> = parts.iter().map(|s| Bytes::from(s.to_string())).collect();
            self.table.execute(&mut self.db, None, &args)
        }
    }

    fn bulk(s: &str) -> Reply {
        Reply::bulk(Bytes::from(s.to_string()))
    }

    fn wrong_type() -> Reply {
        Reply::error(CommandError::WrongType)
    }

    #[test]
    fn test_ping() {
        let mut h = Harness::new();
        assert_eq!(h.run(&["PING"]), Reply::status("PONG"));
        assert_eq!(h.run(&["PING", "hello"]), bulk("hello"));
    }

    #[test]
    fn test_set_get() {
        let mut h = Harness::new();
        assert_eq!(h.run(&["SET", "foo", "bar"]), Reply::Ok);
        assert_eq!(h.run(&["GET", "foo"]), bulk("bar"));
        assert_eq!(h.run(&["GET", "nonexistent"]), Reply::Nil);
    }

    #[test]
    fn test_set_del_get() {
        let mut h = Harness::new();
        h.run(&["SET", "foo", "bar"]);
        assert_eq!(h.run(&["DEL", "foo", "other"]), Reply::integer(1));
        assert_eq!(h.run(&["GET", "foo"]), Reply::Nil);
    }

    #[test]
    fn test_set_with_expiry() {
        let mut h = Harness::new();
        assert_eq!(h.run(&["SET", "k", "v", "EX", "100"]), Reply::Ok);
        match h.run(&["TTL", "k"]) {
            Reply::Integer(n) => assert!((99..=100).contains(&n)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.run(&["SET", "k", "v", "px", "50000"]), Reply::Ok);
        match h.run(&["PTTL", "k"]) {
            Reply::Integer(n) => assert!(n > 49_000 && n <= 50_000),
            other => panic!("unexpected {:?}", other),
        }
        // A plain SET clears the TTL.
        h.run(&["SET", "k", "v"]);
        assert_eq!(h.run(&["TTL", "k"]), Reply::integer(-1));
    }

    #[test]
    fn test_set_bad_options() {
        let mut h = Harness::new();
        assert!(h.run(&["SET", "k", "v", "EX"]).is_error());
        assert!(h.run(&["SET", "k", "v", "EX", "0"]).is_error());
        assert!(h.run(&["SET", "k", "v", "EX", "abc"]).is_error());
        assert!(h.run(&["SET", "k", "v", "NX"]).is_error());
        assert_eq!(h.run(&["EXISTS", "k"]), Reply::integer(0));
    }

    #[test]
    fn test_expire_ttl_persist() {
        let mut h = Harness::new();
        assert_eq!(h.run(&["TTL", "missing"]), Reply::integer(-2));
        h.run(&["SET", "k", "v"]);
        assert_eq!(h.run(&["TTL", "k"]), Reply::integer(-1));
        assert_eq!(h.run(&["EXPIRE", "k", "10"]), Reply::integer(1));
        assert_eq!(h.run(&["TTL", "k"]), Reply::integer(10));
        assert_eq!(h.run(&["PERSIST", "k"]), Reply::integer(1));
        assert_eq!(h.run(&["PERSIST", "k"]), Reply::integer(0));
        assert_eq!(h.run(&["EXPIRE", "missing", "10"]), Reply::integer(0));
    }

    #[test]
    fn test_expire_in_past_deletes() {
        let mut h = Harness::new();
        h.run(&["SET", "k", "v"]);
        assert_eq!(h.run(&["PEXPIRE", "k", "-1"]), Reply::integer(1));
        assert_eq!(h.run(&["GET", "k"]), Reply::Nil);

        h.run(&["SET", "k", "v"]);
        assert_eq!(h.run(&["PEXPIREAT", "k", "1000"]), Reply::integer(1));
        assert_eq!(h.run(&["EXISTS", "k"]), Reply::integer(0));
    }

    #[test]
    fn test_type_and_dbsize() {
        let mut h = Harness::new();
        h.run(&["SET", "s", "v"]);
        h.run(&["RPUSH", "l", "a"]);
        h.run(&["ZADD", "z", "1", "a"]);
        h.run(&["SETBIT", "b", "3", "1"]);
        assert_eq!(h.run(&["TYPE", "s"]), Reply::status("string"));
        assert_eq!(h.run(&["TYPE", "l"]), Reply::status("list"));
        assert_eq!(h.run(&["TYPE", "z"]), Reply::status("zset"));
        assert_eq!(h.run(&["TYPE", "b"]), Reply::status("bitmap"));
        assert_eq!(h.run(&["TYPE", "none"]), Reply::status("none"));
        assert_eq!(h.run(&["DBSIZE"]), Reply::integer(4));
        assert_eq!(h.run(&["FLUSHDB"]), Reply::Ok);
        assert_eq!(h.run(&["DBSIZE"]), Reply::integer(0));
    }

    #[test]
    fn test_list_commands() {
        let mut h = Harness::new();
        assert_eq!(h.run(&["RPUSH", "l", "b", "c"]), Reply::integer(2));
        assert_eq!(h.run(&["LPUSH", "l", "a"]), Reply::integer(3));
        assert_eq!(h.run(&["LLEN", "l"]), Reply::integer(3));
        assert_eq!(
            h.run(&["LRANGE", "l", "0", "-1"]),
            Reply::Array(vec![bulk("a"), bulk("b"), bulk("c")])
        );
        assert_eq!(
            h.run(&["LRANGE", "l", "-2", "100"]),
            Reply::Array(vec![bulk("b"), bulk("c")])
        );
        assert_eq!(h.run(&["LRANGE", "l", "5", "10"]), Reply::Array(vec![]));
        assert_eq!(h.run(&["LPOP", "l"]), bulk("a"));
        assert_eq!(h.run(&["RPOP", "l"]), bulk("c"));
        assert_eq!(h.run(&["RPOP", "l"]), bulk("b"));
        // The empty list is removed with its last element.
        assert_eq!(h.run(&["EXISTS", "l"]), Reply::integer(0));
        assert_eq!(h.run(&["LPOP", "l"]), Reply::Nil);
        assert_eq!(h.run(&["LLEN", "l"]), Reply::integer(0));
    }

    #[test]
    fn test_zset_commands() {
        let mut h = Harness::new();
        assert_eq!(
            h.run(&["ZADD", "z", "1", "one", "2", "two", "3", "three"]),
            Reply::integer(3)
        );
        assert_eq!(h.run(&["ZADD", "z", "1.5", "one"]), Reply::integer(0));
        assert_eq!(h.run(&["ZSCORE", "z", "one"]), bulk("1.5"));
        assert_eq!(h.run(&["ZSCORE", "z", "nope"]), Reply::Nil);
        assert_eq!(h.run(&["ZCARD", "z"]), Reply::integer(3));
        assert_eq!(h.run(&["ZRANK", "z", "two"]), Reply::integer(1));
        assert_eq!(h.run(&["ZREVRANK", "z", "two"]), Reply::integer(1));
        assert_eq!(h.run(&["ZREVRANK", "z", "three"]), Reply::integer(0));
        assert_eq!(
            h.run(&["ZRANGE", "z", "0", "-1"]),
            Reply::Array(vec![bulk("one"), bulk("two"), bulk("three")])
        );
        assert_eq!(
            h.run(&["ZREVRANGE", "z", "0", "0", "WITHSCORES"]),
            Reply::Array(vec![bulk("three"), bulk("3")])
        );
        assert_eq!(
            h.run(&["ZRANGEBYSCORE", "z", "(1.5", "+inf", "withscores"]),
            Reply::Array(vec![bulk("two"), bulk("2"), bulk("three"), bulk("3")])
        );
        assert_eq!(h.run(&["ZREM", "z", "one", "two", "nope"]), Reply::integer(2));
        assert_eq!(h.run(&["ZREM", "z", "three"]), Reply::integer(1));
        assert_eq!(h.run(&["EXISTS", "z"]), Reply::integer(0));
    }

    #[test]
    fn test_zadd_validates_before_mutation() {
        let mut h = Harness::new();
        assert!(h.run(&["ZADD", "z", "1", "a", "bad", "b"]).is_error());
        assert!(h.run(&["ZADD", "z", "1", "a", "2"]).is_error());
        assert!(h.run(&["ZADD", "z", "nan", "a"]).is_error());
        assert_eq!(h.run(&["EXISTS", "z"]), Reply::integer(0));
        assert!(h.run(&["ZRANGEBYSCORE", "z", "x", "1"]).is_error());
        assert!(h.run(&["ZRANGE", "z", "0", "1", "BOGUS"]).is_error());
    }

    #[test]
    fn test_bitmap_commands() {
        let mut h = Harness::new();
        assert_eq!(h.run(&["SETBIT", "b", "7", "1"]), Reply::integer(0));
        assert_eq!(h.run(&["SETBIT", "b", "7", "0"]), Reply::integer(1));
        assert_eq!(h.run(&["SETBIT", "b", "100", "1"]), Reply::integer(0));
        assert_eq!(h.run(&["GETBIT", "b", "100"]), Reply::integer(1));
        assert_eq!(h.run(&["GETBIT", "b", "7"]), Reply::integer(0));
        assert_eq!(h.run(&["GETBIT", "missing", "1"]), Reply::integer(0));
        assert!(h.run(&["SETBIT", "b", "1", "2"]).is_error());
        assert!(h.run(&["SETBIT", "b", "-1", "1"]).is_error());
    }

    #[test]
    fn test_wrong_type() {
        let mut h = Harness::new();
        h.run(&["SET", "s", "v"]);
        h.run(&["RPUSH", "l", "a"]);
        assert_eq!(h.run(&["LPUSH", "s", "x"]), wrong_type());
        assert_eq!(h.run(&["ZADD", "s", "1", "x"]), wrong_type());
        assert_eq!(h.run(&["GET", "l"]), wrong_type());
        assert_eq!(h.run(&["SETBIT", "l", "1", "1"]), wrong_type());
        assert_eq!(h.run(&["LLEN", "s"]), wrong_type());
        assert_eq!(
            h.run(&["GET", "l"]).serialize(),
            b"-ERR operation against a key holding the wrong kind of value\r\n"
        );
    }

    #[test]
    fn test_rewrite_commands_without_aof() {
        let mut h = Harness::new();
        assert!(h.run(&["BGREWRITEAOF"]).is_error());
        assert!(h.run(&["SAVE"]).is_error());
    }
}
