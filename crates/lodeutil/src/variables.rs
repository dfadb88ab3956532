// moon: The build system and package manager for MoonBit.
// Copyright (C) 2024 International Digital Economy Academy
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// For inquiries, you can contact us via e-mail at jichuruanjian@idea.edu.cn.

//! `${name}` variable substitution, used by settings files, settings paths and
//! retrieve patterns.

use indexmap::IndexMap;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VariableError {
    #[error("undefined variable `{0}`")]
    Undefined(String),
    #[error("unterminated variable reference in `{0}`")]
    Unterminated(String),
}

/// An ordered set of variables. Later insertions override earlier ones,
/// except through [`Variables::set_default`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    values: IndexMap<String, String>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Sets `name` only if it has no value yet.
    pub fn set_default(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.entry(name.into()).or_insert_with(|| value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = (String, String)>) {
        self.values.extend(other);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn substitute(&self, input: &str) -> Result<String, VariableError> {
        substitute(input, |name| self.get(name).map(str::to_owned))
    }
}

/// Replaces every `${name}` in `input` using `lookup`. `$` not followed by `{`
/// is kept as is.
pub fn substitute(
    input: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, VariableError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| VariableError::Unterminated(input.to_owned()))?;
        let name = after[..end].trim();
        let value = lookup(name).ok_or_else(|| VariableError::Undefined(name.to_owned()))?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn substitute_variables() {
        let mut vars = Variables::new();
        vars.set("basedir", "/work/app");
        vars.set_default("basedir", "/ignored");
        vars.set("name", "lode");
        assert_eq!(
            vars.substitute("${basedir}/lib/${ name }-$x").unwrap(),
            "/work/app/lib/lode-$x"
        );
        assert_eq!(
            vars.substitute("${missing}/x"),
            Err(VariableError::Undefined("missing".into()))
        );
        assert!(matches!(
            vars.substitute("${basedir"),
            Err(VariableError::Unterminated(_))
        ));
    }
}
