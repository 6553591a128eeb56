use anyhow::anyhow;

/// Parses a repeatable `-e KEY=VALUE` entry. The value may itself contain `=`.
pub fn parse_env_entry(entry: &str) -> Result<(String, String), anyhow::Error> {
    let (key, value) = entry
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected KEY=VALUE, got: {entry}"))?;
    if key.is_empty() {
        return Err(anyhow!("Empty key in env entry: {entry}"));
    }
    Ok((key.to_owned(), value.to_owned()))
}

#[cfg(test)]
mod test {
    use parameterized::parameterized;

    use super::parse_env_entry;

    #[parameterized(
        entry = {"SLEEP_MS=0", "OPTS=a=b", "EMPTY="},
        key = {"SLEEP_MS", "OPTS", "EMPTY"},
        value = {"0", "a=b", ""}
    )]
    fn valid_entries(entry: &str, key: &str, value: &str) {
        assert_eq!(
            parse_env_entry(entry).unwrap(),
            (key.to_owned(), value.to_owned())
        );
    }

    #[parameterized(entry = {"SLEEP_MS", "=0", ""})]
    fn invalid_entries(entry: &str) {
        assert!(parse_env_entry(entry).is_err());
    }
}
