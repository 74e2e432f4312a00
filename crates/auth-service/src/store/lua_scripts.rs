//! Lua scripts for atomic session and rate-limit updates.
//!
//! Every multi-key mutation runs as one script so concurrent server processes
//! never observe a half-written session or race a read-then-write on the
//! failure counter.
//!
//! Scripts that discover keys from stored values (revocation, rotation)
//! rebuild them from the same prefixes as [`super::keys`].

/// Create a session.
///
/// Arguments:
/// - KEYS[1]: Session hash (`session:{id}`)
/// - KEYS[2]: Access token index (`session:token:{digest}`)
/// - KEYS[3]: Identity session set (`identity:{id}:sessions`)
/// - KEYS[4]: Refresh token index (`session:refresh:{digest}`), ignored unless ARGV[3] is `1`
/// - ARGV[1]: TTL in milliseconds
/// - ARGV[2]: Session id
/// - ARGV[3]: `1` if a refresh token is present
/// - ARGV[4..]: Hash field-value pairs
///
/// Returns 1.
pub const CREATE_SESSION: &str = r#"
local ttl = tonumber(ARGV[1])
redis.call('HSET', KEYS[1], unpack(ARGV, 4))
redis.call('PEXPIRE', KEYS[1], ttl)
redis.call('SET', KEYS[2], ARGV[2], 'PX', ttl)
if ARGV[3] == '1' then
    redis.call('SET', KEYS[4], ARGV[2], 'PX', ttl)
end
redis.call('SADD', KEYS[3], ARGV[2])
-- The set lives as long as its longest-lived member
if redis.call('PTTL', KEYS[3]) < ttl then
    redis.call('PEXPIRE', KEYS[3], ttl)
end
return 1
"#;

/// Bump `last_activity_at` on an active session.
///
/// Arguments:
/// - KEYS[1]: Session hash
/// - ARGV[1]: Now (epoch milliseconds)
///
/// Returns 1 if touched, 0 if the session is not active.
pub const TOUCH_SESSION: &str = r#"
if redis.call('HGET', KEYS[1], 'status') ~= 'active' then
    return 0
end
redis.call('HSET', KEYS[1], 'last_activity_at', ARGV[1])
return 1
"#;

/// Rotate access and refresh tokens (compare-and-set on the refresh digest).
///
/// Arguments:
/// - KEYS[1]: Session hash
/// - KEYS[2]: Current refresh token index
/// - KEYS[3]: New access token index
/// - KEYS[4]: New refresh token index
/// - ARGV[1]: Expected refresh digest
/// - ARGV[2]: New access digest
/// - ARGV[3]: New refresh digest
/// - ARGV[4]: Session id
/// - ARGV[5]: Now (epoch milliseconds)
///
/// Returns 1 on success, 0 if the session is not active or the refresh token
/// is stale.
pub const ROTATE_SESSION: &str = r#"
if redis.call('HGET', KEYS[1], 'status') ~= 'active' then
    return 0
end
if redis.call('HGET', KEYS[1], 'refresh_token') ~= ARGV[1] then
    return 0
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl <= 0 then
    return 0
end
local old_access = redis.call('HGET', KEYS[1], 'session_token')
if old_access then
    redis.call('DEL', 'session:token:' .. old_access)
end
redis.call('DEL', KEYS[2])
redis.call('HSET', KEYS[1], 'session_token', ARGV[2], 'refresh_token', ARGV[3], 'last_activity_at', ARGV[5])
redis.call('SET', KEYS[3], ARGV[4], 'PX', ttl)
redis.call('SET', KEYS[4], ARGV[4], 'PX', ttl)
return 1
"#;

/// Revoke one session and drop its token indexes.
///
/// Arguments:
/// - KEYS[1]: Session hash
/// - ARGV[1]: Now (epoch milliseconds)
/// - ARGV[2]: Session id
///
/// Returns 1 if revoked, 0 if the session was not active.
pub const REVOKE_SESSION: &str = r#"
if redis.call('HGET', KEYS[1], 'status') ~= 'active' then
    return 0
end
local fields = redis.call('HMGET', KEYS[1], 'session_token', 'refresh_token', 'identity_id')
redis.call('HSET', KEYS[1], 'status', 'revoked', 'logout_at', ARGV[1])
if fields[1] then
    redis.call('DEL', 'session:token:' .. fields[1])
end
if fields[2] then
    redis.call('DEL', 'session:refresh:' .. fields[2])
end
if fields[3] then
    redis.call('SREM', 'identity:' .. fields[3] .. ':sessions', ARGV[2])
end
return 1
"#;

/// Revoke every active session of an identity.
///
/// Arguments:
/// - KEYS[1]: Identity session set
/// - ARGV[1]: Now (epoch milliseconds)
///
/// Returns the number of sessions revoked.
pub const REVOKE_ALL_SESSIONS: &str = r#"
local ids = redis.call('SMEMBERS', KEYS[1])
local revoked = 0
for _, id in ipairs(ids) do
    local key = 'session:' .. id
    if redis.call('HGET', key, 'status') == 'active' then
        local fields = redis.call('HMGET', key, 'session_token', 'refresh_token')
        redis.call('HSET', key, 'status', 'revoked', 'logout_at', ARGV[1])
        if fields[1] then
            redis.call('DEL', 'session:token:' .. fields[1])
        end
        if fields[2] then
            redis.call('DEL', 'session:refresh:' .. fields[2])
        end
        revoked = revoked + 1
    end
end
redis.call('DEL', KEYS[1])
return revoked
"#;

/// Record a failed login and lock when the threshold is reached.
///
/// Arguments:
/// - KEYS[1]: Counter hash (`ratelimit:login:{hash}`)
/// - ARGV[1]: Now (epoch milliseconds)
/// - ARGV[2]: Threshold
/// - ARGV[3]: Window (milliseconds)
///
/// Returns `{locked, locked_until_ms, failed_count}`:
/// - While locked the counter is left untouched
/// - An elapsed lock starts a fresh counter
/// - The counter's window starts at the first failure
pub const RECORD_FAILURE: &str = r#"
local now = tonumber(ARGV[1])
local threshold = tonumber(ARGV[2])
local window = tonumber(ARGV[3])

local locked_until = tonumber(redis.call('HGET', KEYS[1], 'locked_until') or '0')
if locked_until > now then
    local current = tonumber(redis.call('HGET', KEYS[1], 'failed_count') or '0')
    return {1, locked_until, current}
end
if locked_until > 0 then
    redis.call('DEL', KEYS[1])
end

local count = redis.call('HINCRBY', KEYS[1], 'failed_count', 1)
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], window)
end

if count >= threshold then
    local until_ms = now + window
    redis.call('HSET', KEYS[1], 'locked_until', until_ms)
    redis.call('PEXPIRE', KEYS[1], window)
    return {1, until_ms, count}
end
return {0, 0, count}
"#;
