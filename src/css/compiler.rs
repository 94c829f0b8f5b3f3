//! Compiler from the chapter's inline stylesheet to a [`RuleTable`].
//!
//! Parses at the granularity of qualified rules (selector + declaration
//! block). Anything that is not a recognized declaration is ignored, and a
//! malformed declaration or rule is skipped without aborting compilation.

use cssparser::{Delimiter, ParseError, Parser, ParserInput, Token};
use log::debug;

use super::{Append, RuleTable, StyleRule};

/// A recognized declaration, before selector classification decides what
/// effect it maps to.
#[derive(Debug, Clone)]
enum Decl {
    /// `font-size: 0`
    FontSizeZero,
    /// `transform: scaleX(-1)` (case-insensitive)
    Mirror,
    /// `order: <n>`
    Order(i64),
    /// `content: "<literal>"` or `content: attr(<name>)`
    Content(Append),
}

/// Pseudo-element suffix of a selector part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pseudo {
    None,
    Before,
    After,
    FirstLetter,
    Other,
}

/// Compile a raw stylesheet into the rule table.
///
/// Compiling the same stylesheet twice yields an identical table,
/// including the order sort.
pub fn compile(css: &str) -> RuleTable {
    let mut table = RuleTable::default();
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    compile_rules(&mut parser, &mut table);
    table.sort_order();
    table
}

fn compile_rules<'i>(parser: &mut Parser<'i, '_>, table: &mut RuleTable) {
    loop {
        parser.skip_whitespace();
        if parser.is_exhausted() {
            break;
        }

        // Collect the selector text for classification after the block.
        let prelude: Result<String, ParseError<'i, ()>> =
            parser.parse_until_before(Delimiter::CurlyBracketBlock, |p| {
                let start = p.position();
                while p.next().is_ok() {}
                Ok(p.slice_from(start).trim().to_string())
            });
        let Ok(prelude) = prelude else { break };

        let has_block = matches!(parser.next(), Ok(&Token::CurlyBracketBlock));
        if !has_block {
            if parser.is_exhausted() {
                break;
            }
            continue;
        }

        let decls = parser
            .parse_nested_block(|p| Ok::<_, ParseError<'i, ()>>(parse_declarations(p)))
            .unwrap_or_default();
        if decls.is_empty() {
            continue;
        }

        for selector in prelude.split(',') {
            apply_selector(table, selector.trim(), &decls);
        }
    }
}

/// Parse a declaration block, keeping only recognized declarations.
/// A declaration that fails to parse is skipped up to the next semicolon.
fn parse_declarations<'i>(input: &mut Parser<'i, '_>) -> Vec<Decl> {
    let mut decls = Vec::new();

    loop {
        input.skip_whitespace();
        if input.is_exhausted() {
            break;
        }

        let result: Result<Option<Decl>, ParseError<'i, ()>> = input.try_parse(|i| {
            let property = match i.next()? {
                Token::Ident(name) => name.to_string().to_lowercase(),
                _ => return Err(i.new_custom_error(())),
            };

            i.skip_whitespace();
            match i.next()? {
                Token::Colon => {}
                _ => return Err(i.new_custom_error(())),
            }
            i.skip_whitespace();

            let decl = parse_value(i, &property)?;

            // Consume the rest of the declaration.
            loop {
                match i.next() {
                    Ok(Token::Semicolon) => break,
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
            Ok(decl)
        });

        match result {
            Ok(Some(decl)) => decls.push(decl),
            Ok(None) => {}
            Err(_) => {
                // Skip to the next semicolon to recover.
                loop {
                    match input.next() {
                        Ok(Token::Semicolon) => break,
                        Ok(_) => continue,
                        Err(_) => break,
                    }
                }
            }
        }
    }

    decls
}

fn parse_value<'i>(
    input: &mut Parser<'i, '_>,
    property: &str,
) -> Result<Option<Decl>, ParseError<'i, ()>> {
    match property {
        "font-size" => {
            let zero = matches!(
                input.next()?,
                Token::Number { value, .. } | Token::Dimension { value, .. } if *value == 0.0
            );
            Ok(zero.then_some(Decl::FontSizeZero))
        }
        "transform" => {
            let scalex = matches!(
                input.next()?,
                Token::Function(name) if name.eq_ignore_ascii_case("scalex")
            );
            if !scalex {
                return Ok(None);
            }
            let scale = input.parse_nested_block(|args| match args.next()? {
                Token::Number { value, .. } => Ok(*value),
                _ => Err(args.new_custom_error(())),
            })?;
            Ok((scale == -1.0).then_some(Decl::Mirror))
        }
        "order" => {
            let n = match input.next()? {
                Token::Number {
                    int_value: Some(n), ..
                } => Some(i64::from(*n)),
                _ => None,
            };
            Ok(n.map(Decl::Order))
        }
        "content" => {
            enum ContentKind {
                Literal(String),
                AttrFn,
                Other,
            }
            let kind = match input.next()? {
                Token::QuotedString(text) => ContentKind::Literal(text.to_string()),
                Token::Function(name) if name.eq_ignore_ascii_case("attr") => ContentKind::AttrFn,
                _ => ContentKind::Other,
            };
            match kind {
                ContentKind::Literal(text) => Ok(Some(Decl::Content(Append::Literal(text)))),
                ContentKind::AttrFn => {
                    let attr = input.parse_nested_block(|args| match args.next()? {
                        Token::Ident(name) => Ok(name.to_string()),
                        _ => Err(args.new_custom_error(())),
                    })?;
                    Ok(Some(Decl::Content(Append::Attr(attr))))
                }
                ContentKind::Other => Ok(None),
            }
        }
        _ => Ok(None),
    }
}

/// Split a selector part into its base and pseudo-element suffix.
/// Both `::after` and legacy `:after` spellings occur in the wild.
fn strip_pseudo(part: &str) -> (&str, Pseudo) {
    let (base, suffix) = match part.find(':') {
        Some(idx) => (&part[..idx], part[idx..].trim_start_matches(':')),
        None => (part, ""),
    };
    let pseudo = match suffix.to_ascii_lowercase().as_str() {
        "" => Pseudo::None,
        "before" => Pseudo::Before,
        "after" => Pseudo::After,
        "first-letter" => Pseudo::FirstLetter,
        _ => Pseudo::Other,
    };
    (base, pseudo)
}

/// Classify one selector and fold the declarations into the table.
///
/// `.sy-*` populates the inline-substitution table; `.pN <tag>` populates
/// the paragraph table. Everything else is outside the dialect and ignored.
fn apply_selector(table: &mut RuleTable, selector: &str, decls: &[Decl]) {
    if selector.is_empty() {
        return;
    }
    let mut parts = selector.split_whitespace();
    let Some(first) = parts.next() else { return };
    let second = parts.next();
    if parts.next().is_some() {
        debug!("ignoring selector outside the dialect: {selector:?}");
        return;
    }

    match second {
        None => {
            let (base, pseudo) = strip_pseudo(first);
            if base.starts_with(".sy-") {
                let rule = build_rule(decls, pseudo);
                table.sy.entry(base[1..].to_string()).or_default().merge(&rule);
            } else {
                debug!("ignoring selector outside the dialect: {selector:?}");
            }
        }
        Some(second) => {
            let (class_part, _) = strip_pseudo(first);
            let (tag, pseudo) = strip_pseudo(second);
            let Some(class_key) = class_part.strip_prefix('.') else {
                debug!("ignoring selector outside the dialect: {selector:?}");
                return;
            };
            if !class_key.starts_with('p') || tag.is_empty() || tag.starts_with('.') {
                debug!("ignoring selector outside the dialect: {selector:?}");
                return;
            }

            for decl in decls {
                if let Decl::Order(n) = decl {
                    table.order.push((tag.to_string(), *n));
                }
            }

            let rule = build_rule(decls, pseudo);
            table
                .paragraph
                .entry(class_key.to_string())
                .or_default()
                .entry(tag.to_string())
                .or_default()
                .merge(&rule);
        }
    }
}

fn build_rule(decls: &[Decl], pseudo: Pseudo) -> StyleRule {
    let mut rule = StyleRule::default();
    for decl in decls {
        match decl {
            Decl::FontSizeZero => {
                if pseudo == Pseudo::FirstLetter {
                    rule.delete_first = true;
                } else {
                    rule.delete_all = true;
                }
            }
            Decl::Mirror => rule.mirror = true,
            Decl::Content(append) => match pseudo {
                Pseudo::After => rule.append_end = Some(append.clone()),
                Pseudo::Before => rule.append_start = Some(append.clone()),
                _ => debug!("content outside ::before/::after ignored"),
            },
            Decl::Order(_) => {}
        }
    }
    rule
}
