/// Lua script for a counter with a sliding expiry
///
/// Each increment pushes the expiry out again, so the counter only
/// disappears after `ttl` seconds without a new increment.
///
/// KEYS[1] = counter key
/// ARGV[1] = ttl (milliseconds)
///
/// Returns: the counter value after incrementing
pub const INCREMENT_SCRIPT: &str = r#"
local key = KEYS[1]
local ttl = tonumber(ARGV[1])

local count = redis.call('INCR', key)
redis.call('PEXPIRE', key, ttl)

return count
"#;

/// Lua script for a compare-and-set circuit transition
///
/// The transition only happens if the stored state (missing = closed) still
/// equals the expected source state, so concurrent callers racing on the
/// same transition see exactly one winner.
///
/// KEYS[1] = state key
/// KEYS[2] = failures key
/// KEYS[3] = successes key
/// KEYS[4] = opened_at key
/// ARGV[1] = expected current state
/// ARGV[2] = target state
/// ARGV[3] = current timestamp (milliseconds)
/// ARGV[4] = record ttl (milliseconds)
///
/// Returns: 1 if the transition happened, 0 otherwise
pub const TRANSITION_SCRIPT: &str = r#"
local state_key = KEYS[1]
local failures_key = KEYS[2]
local successes_key = KEYS[3]
local opened_at_key = KEYS[4]
local expected = ARGV[1]
local target = ARGV[2]
local now = ARGV[3]
local ttl = tonumber(ARGV[4])

local current = redis.call('GET', state_key)
if not current then
    current = 'closed'
end

if current ~= expected then
    return 0
end

if target == 'closed' then
    redis.call('DEL', state_key, failures_key, successes_key, opened_at_key)
    return 1
end

redis.call('SET', state_key, target, 'PX', ttl)
redis.call('DEL', failures_key, successes_key)

if target == 'open' then
    redis.call('SET', opened_at_key, now, 'PX', ttl)
else
    redis.call('PEXPIRE', opened_at_key, ttl)
end

return 1
"#;
