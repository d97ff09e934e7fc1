//! The export-manifest convention the `c` adapter requires of its source.
//!
//! A conforming source file declares each function it wants discoverable
//! with a leading comment of the form:
//!
//! ```text
//! // metacall: name(arity)
//! long long name(const long long *args, size_t argc) { ... }
//! ```
//!
//! Every exported function takes an array of `long long` arguments and an
//! argument count, and returns a `long long` — a single fixed native ABI
//! every arity can share, avoiding the need to generate one native thunk
//! per discovered signature.

use metacall::MetacallError;

#[derive(Debug, Clone)]
pub struct ExportedFunction {
    pub name: String,
    pub arity: usize,
}

const PREFIX: &str = "// metacall:";

pub fn scan(source: &str) -> Result<Vec<ExportedFunction>, MetacallError> {
    let mut exports = Vec::new();
    for (lineno, line) in source.lines().enumerate() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix(PREFIX) else {
            continue;
        };
        exports.push(parse_declaration(rest.trim()).map_err(|reason| MetacallError::Load {
            tag: "c".to_string(),
            name: format!("line {}", lineno + 1),
            reason,
        })?);
    }
    Ok(exports)
}

fn parse_declaration(decl: &str) -> Result<ExportedFunction, String> {
    let open = decl.find('(').ok_or_else(|| format!("missing `(` in `{decl}`"))?;
    let close = decl.rfind(')').ok_or_else(|| format!("missing `)` in `{decl}`"))?;
    let name = decl[..open].trim().to_string();
    if name.is_empty() {
        return Err("function name cannot be empty".to_string());
    }
    let arity: usize = decl[open + 1..close]
        .trim()
        .parse()
        .map_err(|_| format!("arity must be an integer in `{decl}`"))?;
    Ok(ExportedFunction { name, arity })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_a_single_declaration() {
        let source = "// metacall: add(2)\nlong long add(const long long *args, size_t argc) { return args[0] + args[1]; }\n";
        let exports = scan(source).unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].name, "add");
        assert_eq!(exports[0].arity, 2);
    }

    #[test]
    fn ignores_unrelated_comments() {
        let source = "// just a comment\n// metacall: noop(0)\n";
        let exports = scan(source).unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].name, "noop");
    }
}
