//! C2 — path-spec translator.
//!
//! Converts a user subdirectory plus a list of pathspec filters into the
//! parallel `source_paths` / `target_paths` lists every scoped `git log`,
//! `git diff-tree`, and `git apply` invocation uses.

/// A normalized repository subdirectory: always ends in `/`, or is
/// exactly `./` for repo root. May carry a `#<alias>` suffix the engine
/// itself ignores (consumed by config/CLI collaborators) and a `##`
/// escape sequence that unescapes to a literal `#`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubDir {
  pub path: String,
  pub alias: Option<String>,
}

impl SubDir {
  pub fn parse(raw: &str) -> Self {
    // `##` is the escape for a literal `#`; do this before alias-splitting
    // so an alias name itself may legitimately contain `#` only via `##`.
    let unescaped = raw.replace("##", "\u{0}");
    let (body, alias) = match unescaped.rfind('#') {
      Some(idx) if !unescaped[idx + 1..].contains('/') && idx + 1 < unescaped.len() => {
        (&unescaped[..idx], Some(unescaped[idx + 1..].to_string()))
      }
      _ => (unescaped.as_str(), None),
    };
    let body = body.replace('\u{0}', "#");
    let path = normalize(&body);
    SubDir { path, alias }
  }

  pub fn is_root(&self) -> bool {
    self.path == "./"
  }

  /// Depth for `git apply -p<N>`. A diff produced by `git log -p`/`git
  /// diff` always carries the default `a/`/`b/` prefix ahead of the
  /// repo-rooted path, so stripping down to a path relative to this
  /// subdir means stripping that prefix *plus* one component per subdir
  /// level: 1 at root (prefix only), `segments + 1` otherwise.
  pub fn strip_depth(&self) -> usize {
    if self.is_root() {
      1
    } else {
      self.path.trim_end_matches('/').split('/').count() + 1
    }
  }
}

fn normalize(raw: &str) -> String {
  let trimmed = raw.trim();
  if trimmed.is_empty() || trimmed == "." || trimmed == "./" {
    return "./".to_string();
  }
  let trimmed = trimmed.trim_start_matches("./").trim_matches('/');
  format!("{trimmed}/")
}

/// A single pathspec filter as the user wrote it: an optional git
/// pathspec-magic prefix (`:^`, `:!`, `:/`, `:(attr)...`) followed by a
/// plain path tail.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedFilter {
  magic: String,
  tail: String,
}

fn parse_filter(filter: &str) -> ParsedFilter {
  if let Some(rest) = filter.strip_prefix(":(") {
    if let Some(close) = rest.find(')') {
      return ParsedFilter {
        magic: format!(":({}", &rest[..close + 1]),
        tail: rest[close + 1..].to_string(),
      };
    }
  }
  for prefix in [":^", ":!", ":/"] {
    if let Some(rest) = filter.strip_prefix(prefix) {
      return ParsedFilter {
        magic: prefix.to_string(),
        tail: rest.to_string(),
      };
    }
  }
  ParsedFilter {
    magic: String::new(),
    tail: filter.to_string(),
  }
}

#[derive(Debug, Clone)]
pub struct PathSpecTranslator {
  pub source_subdir: SubDir,
  pub target_subdir: SubDir,
  pub filters: Vec<String>,
}

impl PathSpecTranslator {
  pub fn new(source_subdir: &str, target_subdir: &str, filters: Vec<String>) -> Self {
    PathSpecTranslator {
      source_subdir: SubDir::parse(source_subdir),
      target_subdir: SubDir::parse(target_subdir),
      filters,
    }
  }

  /// Emits the parallel source/target path lists.
  pub fn paths(&self) -> (Vec<String>, Vec<String>) {
    if self.filters.is_empty() {
      return (
        vec![self.source_subdir.path.clone()],
        vec![self.target_subdir.path.clone()],
      );
    }
    let mut source_paths = Vec::with_capacity(self.filters.len());
    let mut target_paths = Vec::with_capacity(self.filters.len());
    for filter in &self.filters {
      let parsed = parse_filter(filter);
      let tail = parsed.tail.trim_start_matches('/');
      source_paths.push(format!(
        "{}{}{}",
        parsed.magic, self.source_subdir.path, tail
      ));
      target_paths.push(format!(
        "{}{}{}",
        parsed.magic, self.target_subdir.path, tail
      ));
    }
    (source_paths, target_paths)
  }

  /// Appends `-- <paths>` to `args` unless the single path is root
  /// (`./`), matching the one case where a terminator would otherwise
  /// drop empty-tree merge commits a path filter would exclude.
  pub fn append_pathspec<'a>(&self, args: &mut Vec<&'a str>, paths: &'a [String], owned: &'a mut Vec<String>) {
    if paths.len() == 1 && paths[0] == "./" {
      return;
    }
    owned.push("--".to_string());
    args.push(owned.last().unwrap());
    for p in paths {
      args.push(p.as_str());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn root_normalizes_to_dot_slash() {
    assert_eq!(SubDir::parse(".").path, "./");
    assert_eq!(SubDir::parse("./").path, "./");
    assert_eq!(SubDir::parse("").path, "./");
  }

  #[test]
  fn subdir_gets_trailing_slash() {
    assert_eq!(SubDir::parse("package-name").path, "package-name/");
    assert_eq!(SubDir::parse("a/b/").path, "a/b/");
  }

  #[test]
  fn alias_suffix_is_split_off() {
    let s = SubDir::parse("package-name#mypkg");
    assert_eq!(s.path, "package-name/");
    assert_eq!(s.alias.as_deref(), Some("mypkg"));
  }

  #[test]
  fn double_hash_escapes_to_literal_hash() {
    let s = SubDir::parse("pkg##1");
    assert_eq!(s.path, "pkg#1/");
    assert_eq!(s.alias, None);
  }

  #[test]
  fn empty_filters_yields_single_subdir_path() {
    let t = PathSpecTranslator::new("pkg", "./", vec![]);
    let (src, tgt) = t.paths();
    assert_eq!(src, vec!["pkg/".to_string()]);
    assert_eq!(tgt, vec!["./".to_string()]);
  }

  #[test]
  fn filters_are_prefixed_with_subdir_preserving_magic() {
    let t = PathSpecTranslator::new("pkg", "./", vec![":^vendor".to_string(), "README.md".to_string()]);
    let (src, tgt) = t.paths();
    assert_eq!(src, vec![":^pkg/vendor".to_string(), "pkg/README.md".to_string()]);
    assert_eq!(tgt, vec![":^./vendor".to_string(), "./README.md".to_string()]);
  }

  #[test]
  fn strip_depth_counts_segments_plus_diff_prefix() {
    assert_eq!(SubDir::parse("./").strip_depth(), 1);
    assert_eq!(SubDir::parse("pkg").strip_depth(), 2);
    assert_eq!(SubDir::parse("a/b").strip_depth(), 3);
  }
}
