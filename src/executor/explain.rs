//! Structured operator descriptions for diagnostics

use std::fmt;

/// Description of one operator and its inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Explain {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub inputs: Vec<Explain>,
}

impl Explain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            inputs: Vec::new(),
        }
    }

    #[must_use]
    pub fn attr(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.attributes.push((key.into(), value.to_string()));
        self
    }

    #[must_use]
    pub fn input(mut self, input: Explain) -> Self {
        self.inputs.push(input);
        self
    }

    /// First value recorded for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{}", "", self.name, indent = depth * 2)?;
        if !self.attributes.is_empty() {
            write!(f, "(")?;
            for (i, (k, v)) in self.attributes.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", k, v)?;
            }
            write!(f, ")")?;
        }
        writeln!(f)?;
        for input in &self.inputs {
            input.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for Explain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explain_display() {
        let e = Explain::new("Limit_Default")
            .attr("limit", 2)
            .input(Explain::new("ValuesScan_Default").attr("rows", 3));
        assert_eq!(e.get("limit"), Some("2"));
        assert_eq!(
            e.to_string(),
            "Limit_Default(limit: 2)\n  ValuesScan_Default(rows: 3)\n"
        );
    }
}
