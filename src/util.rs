//! Small utility helpers used across modules.

use uuid::Uuid;

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge response bodies. Cuts on a char boundary.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max { return s.to_string(); }
  let mut end = max;
  while !s.is_char_boundary(end) { end -= 1; }
  format!("{}… ({} bytes total)", &s[..end], s.len())
}

/// Id for popups raised locally (not backed by a server event).
pub fn local_id(prefix: &str) -> String {
  format!("{}-{}", prefix, Uuid::new_v4())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn truncation_respects_char_boundaries() {
    assert_eq!(trunc_for_log("short", 10), "short");
    let out = trunc_for_log("ééééé", 3);
    assert!(out.starts_with("é…"));
    assert!(out.ends_with("(10 bytes total)"));
  }

  #[test]
  fn local_ids_are_prefixed_and_unique() {
    let a = local_id("claim");
    let b = local_id("claim");
    assert!(a.starts_with("claim-"));
    assert_ne!(a, b);
  }
}
