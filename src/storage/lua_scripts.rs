/// Lua script for the atomic counter increment
///
/// Runs `INCR` and binds the TTL in one atomic step, so two concurrent
/// callers always observe distinct, consecutive values and the expiry is
/// set exactly once, when the key transitions to present.
///
/// KEYS[1] = the counter key
/// ARGV[1] = TTL in milliseconds
///
/// Returns: the post-increment value
pub const INCREMENT_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])

if current == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end

return current
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_is_valid() {
        // Verify the script is not empty and contains expected commands
        assert!(INCREMENT_SCRIPT.contains("INCR"));
        assert!(INCREMENT_SCRIPT.contains("PEXPIRE"));
    }
}
