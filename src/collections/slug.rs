/// Derive a URL-safe collection id from its display name, unique among
/// `existing` ids.
pub fn generate_slug(name: &str, existing: &[String]) -> String {
    let base = slugify(name);
    make_unique(base, existing)
}

fn slugify(name: &str) -> String {
    let lower = name.to_lowercase();

    // Any run of non-[a-z0-9] chars collapses to a single hyphen.
    let mut slug = String::with_capacity(lower.len());
    let mut prev_was_hyphen = false;
    for ch in lower.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            prev_was_hyphen = false;
        } else if !prev_was_hyphen {
            slug.push('-');
            prev_was_hyphen = true;
        }
    }

    let slug = slug.trim_matches('-').to_string();

    // Cap at 60 chars, re-trim a hyphen the cut may expose.
    let slug = if slug.len() > 60 {
        slug[..60].trim_end_matches('-').to_string()
    } else {
        slug
    };

    if slug.is_empty() {
        "collection".to_string()
    } else {
        slug
    }
}

fn make_unique(base: String, existing: &[String]) -> String {
    if !existing.contains(&base) {
        return base;
    }
    let mut counter: u32 = 2;
    loop {
        let candidate = format!("{}-{}", base, counter);
        if !existing.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}
