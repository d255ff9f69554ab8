// =============================================================================
// Matrixon Homeserver Core - Path Router
// =============================================================================
//
// Project: Matrixon - a federated Matrix homeserver core
// Author: arkSong (arksong2018@gmail.com)
// Contributors: Matrixon Development Team
// Date: 2024-12-11
// Version: 0.11.0-alpha (file-backed object store core)
// License: Apache 2.0 / MIT
//
// Description:
//   The regex-per-segment router: an ordered tree of per-depth child nodes, 
//   matched with first-inserted-wins precedence so ambiguous overlapping 
//   patterns resolve deterministically.
//
// Performance Targets:
//   • O(depth * children-per-node) route resolution
//
// Architecture:
//   • Insertion-order child precedence, not axum's own path router
// =============================================================================

//! The regex-per-segment path router (§4.9).
//!
//! Each node holds an ordered list of children, one per distinct regex
//! seen at that depth; `add` reuses a child whose regex *text* is
//! byte-equal to the one being inserted and otherwise appends a new
//! one at the end. `route` walks the tree picking the first child
//! whose regex matches the current segment — insertion order, per
//! REDESIGN FLAGS and DESIGN.md's decision on the router's inherited
//! ambiguity. Capturing groups in a matched segment's regex are pushed
//! onto the match list in the order they're declared.

use regex::Regex;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("pattern must not be empty")]
    EmptyPattern,
    #[error("invalid regex in path segment '{0}': {1}")]
    BadSegment(String, regex::Error),
}

struct Child<H> {
    pattern: String,
    regex: Regex,
    node: Node<H>,
}

struct Node<H> {
    children: Vec<Child<H>>,
    handler: Option<H>,
}

impl<H> Node<H> {
    fn new() -> Self {
        Node {
            children: Vec::new(),
            handler: None,
        }
    }
}

/// A routing tree keyed by `/`-delimited path segments, each of which
/// is matched against a per-segment regex.
pub struct Router<H> {
    root: Node<H>,
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn anchor(segment: &str) -> String {
    if segment.starts_with('^') && segment.ends_with('$') {
        segment.to_string()
    } else {
        format!("^{segment}$")
    }
}

impl<H> Router<H> {
    pub fn new() -> Self {
        Router { root: Node::new() }
    }

    /// Register `handler` at `pattern`, a `/`-delimited sequence of
    /// per-segment regexes (each implicitly anchored with `^...$` if
    /// not already). An empty pattern or an empty segment's regex is
    /// rejected.
    pub fn add(&mut self, pattern: &str, handler: H) -> Result<(), RouterError> {
        if pattern.is_empty() {
            return Err(RouterError::EmptyPattern);
        }
        let segments = split_segments(pattern);
        let mut node = &mut self.root;
        for segment in segments {
            if segment.is_empty() {
                return Err(RouterError::EmptyPattern);
            }
            let anchored = anchor(segment);
            let index = node.children.iter().position(|c| c.pattern == anchored);
            let index = match index {
                Some(i) => i,
                None => {
                    let regex = Regex::new(&anchored)
                        .map_err(|e| RouterError::BadSegment(segment.to_string(), e))?;
                    node.children.push(Child {
                        pattern: anchored,
                        regex,
                        node: Node::new(),
                    });
                    node.children.len() - 1
                }
            };
            node = &mut node.children[index].node;
        }
        node.handler = Some(handler);
        Ok(())
    }

    /// Route `path`, returning the matched handler and the substrings
    /// captured by any capturing groups along the way, in traversal
    /// order. Trailing empty segments (a trailing `/`) are ignored; the
    /// path `/` (or `""`) invokes the root handler directly.
    pub fn route(&self, path: &str) -> Option<(&H, Vec<String>)> {
        let segments = split_segments(path);
        if segments.is_empty() {
            return self.root.handler.as_ref().map(|h| (h, Vec::new()));
        }
        let mut node = &self.root;
        let mut captures = Vec::new();
        for segment in segments {
            let child = node.children.iter().find(|c| c.regex.is_match(segment))?;
            if let Some(caps) = child.regex.captures(segment) {
                for group in caps.iter().skip(1).flatten() {
                    captures.push(group.as_str().to_string());
                }
            }
            node = &child.node;
        }
        node.handler.as_ref().map(|h| (h, captures))
    }
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Router::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_a_literal_path() {
        let mut r = Router::new();
        r.add("a/b/c", "H").unwrap();
        let (h, caps) = r.route("/a/b/c").unwrap();
        assert_eq!(*h, "H");
        assert!(caps.is_empty());
    }

    #[test]
    fn captures_groups_in_declared_order() {
        let mut r = Router::new();
        r.add(r"users/([^/]+)/filter/([^/]+)", "filter").unwrap();
        let (h, caps) = r.route("/users/alice/filter/f1").unwrap();
        assert_eq!(*h, "filter");
        assert_eq!(caps, vec!["alice".to_string(), "f1".to_string()]);
    }

    #[test]
    fn root_path_invokes_the_root_handler() {
        let mut r: Router<&str> = Router::new();
        r.root.handler = Some("root");
        assert_eq!(r.route("/").unwrap().0, &"root");
        assert_eq!(r.route("").unwrap().0, &"root");
    }

    #[test]
    fn no_match_returns_none() {
        let mut r = Router::new();
        r.add("a/b", "H").unwrap();
        assert!(r.route("/a/c").is_none());
        assert!(r.route("/a/b/c").is_none());
    }

    #[test]
    fn trailing_slash_is_ignored() {
        let mut r = Router::new();
        r.add("a/b", "H").unwrap();
        assert!(r.route("/a/b/").is_some());
    }

    #[test]
    fn empty_pattern_is_rejected() {
        let mut r: Router<&str> = Router::new();
        assert!(matches!(r.add("", "H"), Err(RouterError::EmptyPattern)));
    }

    #[test]
    fn add_reuses_a_child_with_byte_equal_regex_text() {
        let mut r = Router::new();
        r.add("a/b", "first").unwrap();
        r.add("a/c", "second").unwrap();
        // both `add` calls share the `a` child node rather than creating
        // two separate roots for it.
        assert_eq!(r.root.children.len(), 1);
        assert_eq!(r.root.children[0].node.children.len(), 2);
    }

    /// Scenario 6 (§8): registering a literal-looking pattern and a
    /// regex pattern whose text differs creates two sibling children;
    /// whichever was added first wins ties at that level, since
    /// children are tried in insertion order (REDESIGN FLAGS, DESIGN.md).
    #[test]
    fn router_precedence_is_insertion_order() {
        let mut r1 = Router::new();
        r1.add("a/(.*)/c", "H1").unwrap();
        r1.add("a/b/c", "H2").unwrap();
        let (h, _) = r1.route("/a/b/c").unwrap();
        assert_eq!(*h, "H1", "the earlier-registered regex child wins");

        let mut r2 = Router::new();
        r2.add("a/b/c", "H2").unwrap();
        r2.add("a/(.*)/c", "H1").unwrap();
        let (h, _) = r2.route("/a/b/c").unwrap();
        assert_eq!(*h, "H2", "registering the literal first makes it win instead");
    }

    #[test]
    fn registered_patterns_are_disjoint_at_each_level_in_practice() {
        let mut r = Router::new();
        r.add("rooms/([^/]+)/join", "join").unwrap();
        r.add("rooms/([^/]+)/leave", "leave").unwrap();
        assert_eq!(r.route("/rooms/!abc/join").unwrap().0, &"join");
        assert_eq!(r.route("/rooms/!abc/leave").unwrap().0, &"leave");
    }
}
