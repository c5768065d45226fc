use crate::tensor::DType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A tensor dimension: either known statically or named by the step that
/// determines it at run time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dim {
    Fixed(usize),
    Symbolic(String),
}

impl Dim {
    pub fn symbolic(name: impl Into<String>) -> Self {
        Dim::Symbolic(name.into())
    }

    pub fn fixed(&self) -> Option<usize> {
        match self {
            Dim::Fixed(v) => Some(*v),
            Dim::Symbolic(_) => None,
        }
    }

    /// Two dims conflict only when both are fixed and differ.
    pub fn compatible(&self, other: &Dim) -> bool {
        match (self.fixed(), other.fixed()) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl From<usize> for Dim {
    fn from(value: usize) -> Self {
        Dim::Fixed(value)
    }
}

impl From<&str> for Dim {
    fn from(value: &str) -> Self {
        Dim::Symbolic(value.to_string())
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(v) => write!(f, "{v}"),
            Dim::Symbolic(s) => f.write_str(s),
        }
    }
}

/// Static type of a value: element type plus (partially symbolic) shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueInfo {
    pub dtype: DType,
    pub shape: Vec<Dim>,
}

impl ValueInfo {
    pub fn new(dtype: DType, shape: impl IntoIterator<Item = Dim>) -> Self {
        Self {
            dtype,
            shape: shape.into_iter().collect(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn compatible(&self, other: &ValueInfo) -> bool {
        self.dtype == other.dtype
            && self.rank() == other.rank()
            && self
                .shape
                .iter()
                .zip(&other.shape)
                .all(|(a, b)| a.compatible(b))
    }
}

impl fmt::Display for ValueInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.dtype)?;
        for (i, d) in self.shape.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{d}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbolic_dims_match_anything() {
        assert!(Dim::from("num_boxes").compatible(&Dim::Fixed(8400)));
        assert!(Dim::Fixed(640).compatible(&Dim::Fixed(640)));
        assert!(!Dim::Fixed(640).compatible(&Dim::Fixed(320)));
    }

    #[test]
    fn test_value_info_compatibility_checks_rank_and_dtype() {
        let a = ValueInfo::new(DType::F32, [1.into(), 3.into(), 640.into(), 640.into()]);
        let b = ValueInfo::new(DType::F32, ["batch".into(), 3.into(), 640.into(), 640.into()]);
        let c = ValueInfo::new(DType::U8, [1.into(), 3.into(), 640.into(), 640.into()]);
        let d = ValueInfo::new(DType::F32, [3.into(), 640.into(), 640.into()]);

        assert!(a.compatible(&b));
        assert!(!a.compatible(&c));
        assert!(!a.compatible(&d));
    }

    #[test]
    fn test_value_info_display() {
        let v = ValueInfo::new(DType::U8, ["num_bytes".into()]);
        assert_eq!(v.to_string(), "u8[num_bytes]");
    }

    #[test]
    fn test_dims_serialize_untagged() {
        let json = serde_json::to_string(&vec![Dim::Fixed(1), Dim::from("n")]).unwrap();
        assert_eq!(json, r#"[1,"n"]"#);
    }
}
