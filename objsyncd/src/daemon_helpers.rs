fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_required<F>(lookup: &F, name: &str) -> anyhow::Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .filter(|value| !value.trim().is_empty())
        .with_context(|| format!("{name} is not set"))
}

fn read_u64<F>(lookup: &F, name: &str, default: u64) -> anyhow::Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(read_optional_u64(lookup, name)?.unwrap_or(default))
}

/// Like [`read_u64`] but zero is a valid value.
fn read_count<F>(lookup: &F, name: &str, default: u32) -> anyhow::Result<u32>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(name).filter(|value| !value.trim().is_empty()) else {
        return Ok(default);
    };
    value
        .trim()
        .parse::<u32>()
        .with_context(|| format!("{name} must be a non-negative integer, got {value:?}"))
}

/// Unset or empty means "not configured"; anything else must be a positive
/// integer.
fn read_optional_u64<F>(lookup: &F, name: &str) -> anyhow::Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(name).filter(|value| !value.trim().is_empty()) else {
        return Ok(None);
    };
    let parsed = value
        .trim()
        .parse::<u64>()
        .with_context(|| format!("{name} must be a positive integer, got {value:?}"))?;
    if parsed == 0 {
        anyhow::bail!("{name} must be a positive integer, got 0");
    }
    Ok(Some(parsed))
}

fn read_bool<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
