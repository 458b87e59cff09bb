//! Pattern-set parser: raw text to a validated [`PatternTree`].
//!
//! A pattern set is one string holding one or more absolute location
//! patterns separated by `|` or line breaks, e.g.
//! `/shop/items/item | /shop/owner/name`. Each pattern is validated and
//! merged into a single shared tree; bracketed predicates are recognized
//! only to be stripped and reported as diagnostics.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{CompileError, CompileResult};
use crate::pattern::{
    CompileDiagnostic, CompileDiagnostics, PatternKind, PatternNode, PatternTree,
};

/// Maximum number of steps one pattern may have.
pub const MAX_DEPTH: usize = 64;

/// Parse a pattern-set string into a merged tree plus non-fatal diagnostics.
pub(crate) fn parse(pattern_set: &str) -> CompileResult<(PatternTree, CompileDiagnostics)> {
    if pattern_set.trim().is_empty() {
        return Err(CompileError::EmptyInput);
    }

    let segments: Vec<&str> = pattern_set
        .split(['|', '\n', '\r'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if segments.is_empty() {
        return Err(CompileError::EmptyInput);
    }

    let mut tree = PatternTree::default();
    let mut diagnostics = CompileDiagnostics::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for pattern in segments {
        validate_pattern(pattern)?;

        let steps: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        if steps.is_empty() {
            return Err(CompileError::MalformedPatternSyntax {
                pattern: pattern.to_string(),
            });
        }
        if steps.len() > MAX_DEPTH {
            return Err(CompileError::ExceedsMaxDepth {
                pattern: pattern.to_string(),
            });
        }

        insert(&mut tree, &steps, pattern, &mut diagnostics)?;

        if !seen.insert(pattern) {
            diagnostics.push(CompileDiagnostic::DuplicatePattern {
                pattern: pattern.to_string(),
            });
        }
    }

    debug!(
        patterns = seen.len(),
        nodes = tree.node_count(),
        notes = diagnostics.len(),
        "compiled pattern set"
    );

    Ok((tree, diagnostics))
}

/// Whole-pattern checks that need no tree context.
fn validate_pattern(pattern: &str) -> CompileResult<()> {
    if !pattern.starts_with('/') || pattern.contains("//") {
        return Err(CompileError::RelativePath {
            pattern: pattern.to_string(),
        });
    }
    if pattern.contains("::") {
        return Err(CompileError::AxisSpecifier {
            pattern: pattern.to_string(),
        });
    }
    Ok(())
}

/// Merge one pattern into the tree, transactionally.
///
/// Step identifiers are created level by level while walking, so a failure
/// deep in the path (a bad name, a conflict) can happen after nodes for the
/// shallower levels were already created. Those nodes are unlinked again
/// before the error is raised, leaving the tree exactly as it was after the
/// last successful pattern.
fn insert(
    tree: &mut PatternTree,
    steps: &[&str],
    pattern: &str,
    diagnostics: &mut CompileDiagnostics,
) -> CompileResult<()> {
    let nodes_mark = tree.nodes.len();
    let names_mark = tree.names.len();

    match try_insert(tree, steps, pattern, diagnostics) {
        Ok(()) => Ok(()),
        Err(err) => {
            tree.nodes.truncate(nodes_mark);
            tree.names.truncate(names_mark);
            for node in &mut tree.nodes {
                if let PatternKind::Branch { children } = &mut node.kind {
                    children.retain(|&c| c < nodes_mark);
                }
            }
            Err(err)
        }
    }
}

fn try_insert(
    tree: &mut PatternTree,
    steps: &[&str],
    pattern: &str,
    diagnostics: &mut CompileDiagnostics,
) -> CompileResult<()> {
    let root_step = identifier(steps[0], pattern, diagnostics)?;

    if tree.is_empty() {
        let name = tree.name_id(&root_step);
        let kind = if steps.len() == 1 {
            PatternKind::Leaf {
                requested: vec![pattern.to_string()],
            }
        } else {
            PatternKind::Branch {
                children: Vec::new(),
            }
        };
        tree.nodes.push(PatternNode { name, kind });
    } else {
        let root_name = tree.name_text(tree.node(tree.root()).name);
        if root_step != root_name {
            return Err(CompileError::DifferentRoots {
                root: root_name.to_string(),
                pattern: pattern.to_string(),
            });
        }
        if steps.len() == 1 {
            return match &mut tree.nodes[0].kind {
                PatternKind::Leaf { requested } => {
                    requested.push(pattern.to_string());
                    Ok(())
                }
                PatternKind::Branch { .. } => Err(CompileError::ConflictingDepths {
                    existing: tree.first_requested(0),
                    pattern: pattern.to_string(),
                }),
            };
        }
    }

    let mut cur = tree.root();

    for (i, raw_step) in steps.iter().enumerate().skip(1) {
        let last = i + 1 == steps.len();

        if let PatternKind::Leaf { requested } = &tree.nodes[cur].kind {
            // The pattern needs to descend through a terminal node.
            return Err(CompileError::ConflictingDepths {
                existing: requested[0].clone(),
                pattern: pattern.to_string(),
            });
        }

        let step = identifier(raw_step, pattern, diagnostics)?;
        let name = tree.name_id(&step);
        let existing = tree
            .children(cur)
            .iter()
            .copied()
            .find(|&c| tree.nodes[c].name == name);

        match existing {
            Some(child) if last => {
                return match &mut tree.nodes[child].kind {
                    PatternKind::Leaf { requested } => {
                        requested.push(pattern.to_string());
                        Ok(())
                    }
                    PatternKind::Branch { .. } => Err(CompileError::ConflictingDepths {
                        existing: tree.first_requested(child),
                        pattern: pattern.to_string(),
                    }),
                };
            }
            Some(child) => cur = child,
            None => {
                let kind = if last {
                    PatternKind::Leaf {
                        requested: vec![pattern.to_string()],
                    }
                } else {
                    PatternKind::Branch {
                        children: Vec::new(),
                    }
                };
                let id = tree.nodes.len();
                tree.nodes.push(PatternNode { name, kind });
                match &mut tree.nodes[cur].kind {
                    PatternKind::Branch { children } => children.push(id),
                    PatternKind::Leaf { .. } => unreachable!("checked above"),
                }
                cur = id;
            }
        }
    }

    Ok(())
}

/// Strip and report a trailing predicate, then validate the step as a name.
fn identifier(
    raw_step: &str,
    pattern: &str,
    diagnostics: &mut CompileDiagnostics,
) -> CompileResult<String> {
    let mut step = raw_step;
    if let Some(idx) = step.find('[') {
        diagnostics.push(CompileDiagnostic::PredicateIgnored {
            predicate: step[idx..].to_string(),
        });
        step = &step[..idx];
    }

    if step.contains('*') || step.contains("text()") || step.contains("node()") {
        return Err(CompileError::UnsupportedWildcardOrFunction {
            step: step.to_string(),
            pattern: pattern.to_string(),
        });
    }
    if step.contains('@') {
        return Err(CompileError::AttributeSelection {
            step: step.to_string(),
            pattern: pattern.to_string(),
        });
    }
    if !is_xml_name(step) {
        return Err(CompileError::InvalidName {
            step: step.to_string(),
            pattern: pattern.to_string(),
        });
    }

    Ok(step.to_string())
}

/// XML 1.0 `Name` production.
fn is_xml_name(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if is_name_start_char(c) => {}
        _ => return false,
    }
    chars.all(is_name_char)
}

fn is_name_start_char(c: char) -> bool {
    matches!(c,
        ':' | '_' | 'A'..='Z' | 'a'..='z'
        | '\u{C0}'..='\u{D6}' | '\u{D8}'..='\u{F6}' | '\u{F8}'..='\u{2FF}'
        | '\u{370}'..='\u{37D}' | '\u{37F}'..='\u{1FFF}'
        | '\u{200C}'..='\u{200D}' | '\u{2070}'..='\u{218F}'
        | '\u{2C00}'..='\u{2FEF}' | '\u{3001}'..='\u{D7FF}'
        | '\u{F900}'..='\u{FDCF}' | '\u{FDF0}'..='\u{FFFD}'
        | '\u{10000}'..='\u{EFFFF}')
}

fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9' | '\u{B7}'
            | '\u{300}'..='\u{36F}' | '\u{203F}'..='\u{2040}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_pattern_builds_chain() {
        let (tree, diagnostics) = parse("/a/b/c").unwrap();
        assert_eq!(tree.node_count(), 3);
        assert_eq!(tree.requested(2), &["/a/b/c".to_string()]);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_patterns_share_common_prefix() {
        let (tree, _) = parse("/a/b/c|/a/b/d").unwrap();
        // a, b, c, d — the prefix nodes are shared.
        assert_eq!(tree.node_count(), 4);
    }

    #[test]
    fn test_newlines_separate_patterns() {
        let (tree, _) = parse("/a/b\n/a/c\r\n/a/d").unwrap();
        assert_eq!(tree.node_count(), 4);
    }

    #[test]
    fn test_segments_are_trimmed() {
        let (tree, diagnostics) = parse("  /a/b  |  /a/c  ").unwrap();
        assert_eq!(tree.node_count(), 3);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_empty_input_is_fatal() {
        assert!(matches!(parse(""), Err(CompileError::EmptyInput)));
        assert!(matches!(parse("   \n "), Err(CompileError::EmptyInput)));
        assert!(matches!(parse("|||"), Err(CompileError::EmptyInput)));
    }

    #[test]
    fn test_relative_paths_rejected() {
        assert!(matches!(
            parse("a/b"),
            Err(CompileError::RelativePath { .. })
        ));
        assert!(matches!(
            parse("/a//b"),
            Err(CompileError::RelativePath { .. })
        ));
    }

    #[test]
    fn test_axis_specifier_rejected() {
        assert!(matches!(
            parse("/root/child::child"),
            Err(CompileError::AxisSpecifier { .. })
        ));
    }

    #[test]
    fn test_wildcards_and_functions_rejected() {
        assert!(matches!(
            parse("/root/*"),
            Err(CompileError::UnsupportedWildcardOrFunction { .. })
        ));
        assert!(matches!(
            parse("/root/text()"),
            Err(CompileError::UnsupportedWildcardOrFunction { .. })
        ));
        assert!(matches!(
            parse("/root/node()"),
            Err(CompileError::UnsupportedWildcardOrFunction { .. })
        ));
    }

    #[test]
    fn test_attribute_selection_rejected() {
        assert!(matches!(
            parse("/root/@id"),
            Err(CompileError::AttributeSelection { .. })
        ));
    }

    #[test]
    fn test_invalid_name_rejected() {
        assert!(matches!(
            parse("/root/1st"),
            Err(CompileError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_depth_limit() {
        let ok: String = (0..MAX_DEPTH)
            .map(|i| if i % 2 == 0 { "/aa" } else { "/bb" })
            .collect();
        assert!(parse(&ok).is_ok());

        let too_deep = format!("{ok}/cc");
        assert!(matches!(
            parse(&too_deep),
            Err(CompileError::ExceedsMaxDepth { .. })
        ));
    }

    #[test]
    fn test_different_roots_rejected() {
        assert!(matches!(
            parse("/a/b|/x/b"),
            Err(CompileError::DifferentRoots { .. })
        ));
    }

    #[test]
    fn test_shallower_pattern_conflicts() {
        let err = parse("/root/child|/root").unwrap_err();
        assert!(matches!(
            err,
            CompileError::ConflictingDepths { ref existing, .. } if existing == "/root/child"
        ));
    }

    #[test]
    fn test_deeper_pattern_conflicts() {
        assert!(matches!(
            parse("/root|/root/child"),
            Err(CompileError::ConflictingDepths { .. })
        ));
        assert!(matches!(
            parse("/a/b|/a/b/c"),
            Err(CompileError::ConflictingDepths { .. })
        ));
    }

    #[test]
    fn test_predicate_is_stripped_and_reported() {
        let (tree, diagnostics) = parse("/items/item[@id='1']").unwrap();
        assert_eq!(tree.requested(1), &["/items/item[@id='1']".to_string()]);
        assert_eq!(
            diagnostics.as_slice(),
            &[CompileDiagnostic::PredicateIgnored {
                predicate: "[@id='1']".to_string()
            }]
        );
    }

    #[test]
    fn test_duplicate_pattern_reported_and_still_recorded() {
        let (tree, diagnostics) = parse("/a/b|/a/b").unwrap();
        assert_eq!(tree.requested(1), &["/a/b".to_string(), "/a/b".to_string()]);
        assert_eq!(
            diagnostics.as_slice(),
            &[CompileDiagnostic::DuplicatePattern {
                pattern: "/a/b".to_string()
            }]
        );
    }

    #[test]
    fn test_failed_pattern_rolls_back_created_nodes() {
        // `x` is created before the invalid final step is discovered; the
        // whole compile fails, but the merge itself must not leave `x`
        // half-linked (exercised through the insert building blocks).
        let mut tree = PatternTree::default();
        let mut diagnostics = CompileDiagnostics::default();
        insert(&mut tree, &["a", "b"], "/a/b", &mut diagnostics).unwrap();
        let count = tree.node_count();

        let err = insert(&mut tree, &["a", "x", "@id"], "/a/x/@id", &mut diagnostics).unwrap_err();
        assert!(matches!(err, CompileError::AttributeSelection { .. }));
        assert_eq!(tree.node_count(), count);

        // The tree still accepts patterns through the same parent.
        insert(&mut tree, &["a", "x", "y"], "/a/x/y", &mut diagnostics).unwrap();
    }
}
