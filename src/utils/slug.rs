/// Lowercases, collapses non-alphanumeric runs to single dashes, and trims
/// leading/trailing dashes. Empty input falls back to "org".
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "org".to_string()
    } else {
        slug
    }
}

/// Candidate slugs in collision order: `acme`, `acme-2`, `acme-3`, ...
pub fn slug_candidates(name: &str) -> impl Iterator<Item = String> {
    let base = slugify(name);
    (1u32..).map(move |n| {
        if n == 1 {
            base.clone()
        } else {
            format!("{}-{}", base, n)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugifies_names() {
        assert_eq!(slugify("Acme"), "acme");
        assert_eq!(slugify("Acme Swim School"), "acme-swim-school");
        assert_eq!(slugify("  Héllo -- World!  "), "h-llo-world");
        assert_eq!(slugify("!!!"), "org");
    }

    #[test]
    fn candidates_suffix_from_two() {
        let mut c = slug_candidates("Acme");
        assert_eq!(c.next().unwrap(), "acme");
        assert_eq!(c.next().unwrap(), "acme-2");
        assert_eq!(c.next().unwrap(), "acme-3");
    }
}
