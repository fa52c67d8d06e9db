//!
//! src/slug.rs
//!
//! Human readable, url safe slugs for release pages.
//!

use std::sync::atomic::{AtomicU64, Ordering};

use any_ascii::any_ascii;
use uuid::Uuid;

use crate::provider::UNKNOWN_RELEASE;

/// Lowercase ascii, runs of anything non-alphanumeric collapsed to a
/// single `-`, no leading or trailing separator. Idempotent.
pub fn slugify(title: &str) -> String {
    let ascii = any_ascii(title).to_ascii_lowercase();
    let mut slug = String::with_capacity(ascii.len());
    let mut pending_sep = false;

    for c in ascii.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('-');
            }
            pending_sep = false;
            slug.push(c);
        } else {
            pending_sep = true;
        }
    }
    slug
}

/// Assigns slugs; placeholder titles get an opaque unique slug instead of
/// all sharing `unknown-release`.
#[derive(Debug)]
pub struct SlugGenerator {
    prefix: String,
    instance: String,
    counter: AtomicU64
}

impl Default for SlugGenerator {
    fn default() -> Self { Self::new("release") }
}

impl SlugGenerator {
    pub fn new(prefix: &str) -> Self {
        let prefix = match slugify(prefix) {
            p if p.is_empty() => "release".to_string(),
            p => p
        };
        let mut instance = Uuid::new_v4().simple().to_string();
        instance.truncate(8);
        Self { prefix, instance, counter: AtomicU64::new(0) }
    }

    pub fn assign(&self, title: &str) -> String {
        if title.trim().eq_ignore_ascii_case(UNKNOWN_RELEASE) {
            return self.fallback();
        }
        match slugify(title) {
            s if s.is_empty() => self.fallback(),
            s => s
        }
    }

    /// `<prefix>-<instance>-<n>`: the instance part differs per process,
    /// the counter never repeats within one.
    pub fn fallback(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{:x}", self.prefix, self.instance, n)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn basic_titles() {
        assert_eq!(slugify("Song"), "song");
        assert_eq!(slugify("  Hello, World!  "), "hello-world");
        assert_eq!(slugify("AC/DC -- Back in Black (Remastered)"), "ac-dc-back-in-black-remastered");
    }

    #[test]
    fn transliterates() {
        assert_eq!(slugify("Björk"), "bjork");
        assert_eq!(slugify("Кино"), "kino");
        assert_eq!(slugify("Beyoncé — Halo"), "beyonce-halo");
    }

    #[test]
    fn idempotent() {
        for title in ["Song", "Кино - Группа крови", "a  b", "--x--", "Ünïcödé 2024!"] {
            let once = slugify(title);
            assert_eq!(slugify(&once), once, "{title}");
        }
    }

    #[test]
    fn regular_title_uses_slugify() {
        let slugs = SlugGenerator::default();
        assert_eq!(slugs.assign("Song"), "song");
        assert_eq!(slugs.assign("Song"), "song");
    }

    #[test]
    fn placeholder_titles_never_collide() {
        let slugs = SlugGenerator::default();
        let a = slugs.assign(UNKNOWN_RELEASE);
        let b = slugs.assign("unknown release");
        assert_ne!(a, b);
        assert!(a.starts_with("release-"));

        let many: HashSet<String> = (0..1000).map(|_| slugs.assign(UNKNOWN_RELEASE)).collect();
        assert_eq!(many.len(), 1000);
    }

    #[test]
    fn empty_slug_takes_fallback() {
        let slugs = SlugGenerator::new("Release!");
        let s = slugs.assign("!!!");
        assert!(s.starts_with("release-"), "{s}");
    }

    #[test]
    fn separate_generators_differ() {
        let a = SlugGenerator::default().fallback();
        let b = SlugGenerator::default().fallback();
        assert_ne!(a, b);
    }
}
