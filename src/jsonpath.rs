//! Minimal JSONPath subset shared by the RAG strategy and replay masking.
//!
//! Supported forms: `$.a.b`, `$.a[*].b`, `$[*]`, and any combination of
//! object keys and array wildcards. Indexed access, filters, recursive
//! descent, and quoted keys are outside the subset; strict replay mode
//! treats them as configuration errors rather than silently skipping them.

use serde_json::Value;

/// One step of a compiled path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    /// Descend into an object key.
    Key(String),
    /// Fan out over every element of an array.
    Wildcard,
}

/// A compiled JSONPath expression.
#[derive(Debug, Clone)]
pub struct JsonPath {
    steps: Vec<Step>,
    raw: String,
}

impl JsonPath {
    /// Parses an expression, rejecting anything outside the subset.
    ///
    /// # Errors
    ///
    /// Returns a description of the first unsupported construct.
    pub fn parse(expr: &str) -> Result<Self, String> {
        let rest = expr
            .strip_prefix('$')
            .ok_or_else(|| format!("'{expr}': must start with '$'"))?;

        let mut steps = Vec::new();
        let mut chars = rest.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            match c {
                '.' => {
                    if matches!(chars.peek(), Some((_, '.'))) {
                        return Err(format!("'{expr}': recursive descent '..' not supported"));
                    }
                    let key: String = {
                        let mut k = String::new();
                        while let Some(&(_, nc)) = chars.peek() {
                            if nc == '.' || nc == '[' {
                                break;
                            }
                            k.push(nc);
                            chars.next();
                        }
                        k
                    };
                    if key.is_empty() {
                        return Err(format!("'{expr}': empty key at offset {i}"));
                    }
                    if key == "*" {
                        return Err(format!("'{expr}': object wildcard '.*' not supported"));
                    }
                    steps.push(Step::Key(key));
                }
                '[' => {
                    let star = chars.next();
                    let close = chars.next();
                    match (star, close) {
                        (Some((_, '*')), Some((_, ']'))) => steps.push(Step::Wildcard),
                        _ => {
                            return Err(format!(
                                "'{expr}': only '[*]' subscripts are supported"
                            ));
                        }
                    }
                }
                _ => return Err(format!("'{expr}': unexpected character '{c}'")),
            }
        }

        if steps.is_empty() {
            return Err(format!("'{expr}': path selects the whole document"));
        }

        Ok(Self {
            steps,
            raw: expr.to_string(),
        })
    }

    /// The original expression text.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Applies `f` to every value the path selects, in document order.
    ///
    /// Returns the number of values visited. Missing keys and type
    /// mismatches prune the branch silently; a path that matches nothing
    /// visits zero values.
    pub fn for_each_mut<F>(&self, root: &mut Value, mut f: F) -> usize
    where
        F: FnMut(&mut Value),
    {
        let mut count = 0;
        Self::walk(&self.steps, root, &mut f, &mut count);
        count
    }

    fn walk<F>(steps: &[Step], value: &mut Value, f: &mut F, count: &mut usize)
    where
        F: FnMut(&mut Value),
    {
        let Some((step, rest)) = steps.split_first() else {
            f(value);
            *count += 1;
            return;
        };

        match step {
            Step::Key(key) => {
                if let Some(child) = value.get_mut(key.as_str()) {
                    Self::walk(rest, child, f, count);
                }
            }
            Step::Wildcard => {
                if let Value::Array(items) = value {
                    for item in items.iter_mut() {
                        Self::walk(rest, item, f, count);
                    }
                }
            }
        }
    }
}
