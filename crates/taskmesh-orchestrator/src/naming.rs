use uuid::Uuid;

const MAX_SLUG_WORDS: usize = 5;
const MAX_SLUG_CHARS: usize = 40;

/// Filesystem-safe project id: a slug of the task's first words plus a
/// short random suffix, e.g. `write-and-test-a-sort-1f3a9c02`.
pub fn project_id(task: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", slug(task), &suffix[..8])
}

/// Lowercase alphanumeric words joined by `-`. Falls back to `project`.
pub fn slug(task: &str) -> String {
    let mut out = String::new();
    let words = task
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(MAX_SLUG_WORDS);
    for word in words {
        if out.len() + word.len() + 1 > MAX_SLUG_CHARS {
            break;
        }
        if !out.is_empty() {
            out.push('-');
        }
        out.push_str(&word.to_ascii_lowercase());
    }
    if out.is_empty() {
        "project".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug() {
        assert_eq!(slug("Write and test a sort function"), "write-and-test-a-sort");
        assert_eq!(slug("  Scrape techmeme.com!! "), "scrape-techmeme-com");
        assert_eq!(slug("¿¡…"), "project");
    }

    #[test]
    fn test_project_id_shape() {
        let id = project_id("Build a CLI");
        assert!(id.starts_with("build-a-cli-"));
        assert_eq!(id.len(), "build-a-cli-".len() + 8);
        assert_ne!(project_id("x"), project_id("x"));
    }
}
