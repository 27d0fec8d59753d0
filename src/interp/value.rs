//! Dynamically tagged runtime values.
//!
//! Every value knows its type; operations are decidable from operand types
//! alone. Values are owned — mutation targets are expressed as `Place`
//! paths in the evaluator rather than interior pointers.

use crate::interp::types::Type;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A complex number with the handful of operations the builtin math
/// library needs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub fn new(re: f64, im: f64) -> Self {
        Complex { re, im }
    }

    pub const I: Complex = Complex { re: 0.0, im: 1.0 };

    pub fn abs(self) -> f64 {
        self.re.hypot(self.im)
    }

    pub fn arg(self) -> f64 {
        self.im.atan2(self.re)
    }

    pub fn exp(self) -> Complex {
        let r = self.re.exp();
        Complex::new(r * self.im.cos(), r * self.im.sin())
    }

    pub fn ln(self) -> Complex {
        Complex::new(self.abs().ln(), self.arg())
    }

    pub fn log10(self) -> Complex {
        self.ln() / Complex::new(std::f64::consts::LN_10, 0.0)
    }

    pub fn sqrt(self) -> Complex {
        let r = self.abs().sqrt();
        let theta = self.arg() / 2.0;
        Complex::new(r * theta.cos(), r * theta.sin())
    }

    pub fn sin(self) -> Complex {
        Complex::new(
            self.re.sin() * self.im.cosh(),
            self.re.cos() * self.im.sinh(),
        )
    }

    pub fn cos(self) -> Complex {
        Complex::new(
            self.re.cos() * self.im.cosh(),
            -self.re.sin() * self.im.sinh(),
        )
    }

    pub fn tan(self) -> Complex {
        self.sin() / self.cos()
    }

    pub fn asin(self) -> Complex {
        // asin z = -i ln(iz + sqrt(1 - z^2))
        let one = Complex::new(1.0, 0.0);
        -(Complex::I) * ((Complex::I * self + (one - self * self).sqrt()).ln())
    }

    pub fn acos(self) -> Complex {
        // acos z = -i ln(z + i sqrt(1 - z^2))
        let one = Complex::new(1.0, 0.0);
        -(Complex::I) * ((self + Complex::I * (one - self * self).sqrt()).ln())
    }

    pub fn atan(self) -> Complex {
        // atan z = (i/2) ln((i + z) / (i - z))
        let half_i = Complex::new(0.0, 0.5);
        half_i * ((Complex::I + self) / (Complex::I - self)).ln()
    }

    pub fn powc(self, exp: Complex) -> Complex {
        if self.re == 0.0 && self.im == 0.0 {
            return Complex::default();
        }
        (exp * self.ln()).exp()
    }
}

impl std::ops::Add for Complex {
    type Output = Complex;
    fn add(self, rhs: Complex) -> Complex {
        Complex::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl std::ops::Sub for Complex {
    type Output = Complex;
    fn sub(self, rhs: Complex) -> Complex {
        Complex::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl std::ops::Mul for Complex {
    type Output = Complex;
    fn mul(self, rhs: Complex) -> Complex {
        Complex::new(
            self.re * rhs.re - self.im * rhs.im,
            self.re * rhs.im + self.im * rhs.re,
        )
    }
}

impl std::ops::Div for Complex {
    type Output = Complex;
    fn div(self, rhs: Complex) -> Complex {
        let d = rhs.re * rhs.re + rhs.im * rhs.im;
        Complex::new(
            (self.re * rhs.re + self.im * rhs.im) / d,
            (self.im * rhs.re - self.re * rhs.im) / d,
        )
    }
}

impl std::ops::Neg for Complex {
    type Output = Complex;
    fn neg(self) -> Complex {
        Complex::new(-self.re, -self.im)
    }
}

/// A runtime value. Lists and maps carry their element/key types so empty
/// containers stay typed.
#[derive(Debug, Clone)]
pub enum Value {
    Void,
    Bool(bool),
    Char(char),
    Integer(i64),
    Double(f64),
    Complex(Complex),
    List(Type, Vec<Value>),
    VariadicList(Type, Vec<Value>),
    Map(Type, Type, BTreeMap<Value, Value>),
    /// signature, command name. Commands are looked up by name at call
    /// time so values can be persisted and outlive reloads.
    Function(Type, String),
}

impl Value {
    pub fn of_string(s: &str) -> Value {
        Value::List(Type::Char, s.chars().map(Value::Char).collect())
    }

    pub fn of_list(elm: Type, values: Vec<Value>) -> Value {
        Value::List(elm, values)
    }

    pub fn empty_list() -> Value {
        Value::List(Type::Void, Vec::new())
    }

    /// A default-initialised value of `ty`; functions and generics have no
    /// default.
    pub fn default_of(ty: &Type) -> Option<Value> {
        Some(match ty {
            Type::Void => Value::Void,
            Type::Bool => Value::Bool(false),
            Type::Char => Value::Char('\0'),
            Type::Integer => Value::Integer(0),
            Type::Double => Value::Double(0.0),
            Type::Complex => Value::Complex(Complex::default()),
            Type::List(elm) => Value::List((**elm).clone(), Vec::new()),
            Type::VariadicList(elm) => Value::VariadicList((**elm).clone(), Vec::new()),
            Type::Map(key, elm) => Value::Map((**key).clone(), (**elm).clone(), BTreeMap::new()),
            Type::Function(..) | Type::Generic(..) => return None,
        })
    }

    pub fn type_of(&self) -> Type {
        match self {
            Value::Void => Type::Void,
            Value::Bool(_) => Type::Bool,
            Value::Char(_) => Type::Char,
            Value::Integer(_) => Type::Integer,
            Value::Double(_) => Type::Double,
            Value::Complex(_) => Type::Complex,
            Value::List(elm, _) => Type::List(Box::new(elm.clone())),
            Value::VariadicList(elm, _) => Type::VariadicList(Box::new(elm.clone())),
            Value::Map(key, elm, _) => Type::Map(Box::new(key.clone()), Box::new(elm.clone())),
            Value::Function(sig, _) => sig.clone(),
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::List(Type::Char, _))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(..) | Value::VariadicList(..))
    }

    /// The contents of a `[char]` value, if that's what this is.
    pub fn get_string(&self) -> Option<String> {
        match self {
            Value::List(Type::Char, chars) => Some(
                chars
                    .iter()
                    .filter_map(|c| match c {
                        Value::Char(c) => Some(*c),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn get_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(_, xs) | Value::VariadicList(_, xs) => Some(xs),
            _ => None,
        }
    }

    pub fn get_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(_, xs) | Value::VariadicList(_, xs) => Some(xs),
            _ => None,
        }
    }

    /// Casts to `target` when the cast distance allows it. Lists and maps
    /// pass through unchanged (void/generic element targets act as
    /// placeholders).
    pub fn cast_to(&self, target: &Type) -> Option<Value> {
        self.type_of().cast_distance(target)?;

        let ty = self.type_of();
        if ty.is_same(target) {
            return Some(self.clone());
        }

        match (self, target) {
            (Value::Integer(x), Type::Double) => Some(Value::Double(*x as f64)),
            (Value::Integer(x), Type::Complex) => {
                Some(Value::Complex(Complex::new(*x as f64, 0.0)))
            }
            (Value::Double(x), Type::Complex) => Some(Value::Complex(Complex::new(*x, 0.0))),
            (v, t) if (v.is_list() && t.is_list()) || (matches!(v, Value::Map(..)) && t.is_map()) => {
                Some(v.clone())
            }
            (v, Type::Generic(..)) => Some(v.clone()),
            _ => None,
        }
    }

    fn format_double(x: f64) -> String {
        format!("{x:.3}")
    }

    fn format_complex(c: Complex) -> String {
        let im = if c.im.abs() < 0.0001 { 0.0 } else { c.im };
        if im != 0.0 {
            format!("{:.3}{:+.3}i", c.re, im)
        } else {
            format!("{:.3}", c.re)
        }
    }

    /// The unquoted, user-facing form: strings render their characters,
    /// lists join their elements with spaces.
    pub fn raw_str(&self) -> String {
        match self {
            Value::Void => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Char(c) => c.to_string(),
            Value::Integer(x) => x.to_string(),
            Value::Double(x) => Value::format_double(*x),
            Value::Complex(c) => Value::format_complex(*c),
            Value::List(Type::Char, _) => self.get_string().unwrap_or_default(),
            Value::List(_, xs) | Value::VariadicList(_, xs) => xs
                .iter()
                .map(Value::str)
                .collect::<Vec<_>>()
                .join(" "),
            Value::Map(_, _, map) => map
                .iter()
                .map(|(k, v)| format!("{}: {}", k.raw_str(), v.raw_str()))
                .collect::<Vec<_>>()
                .join(" "),
            Value::Function(_, name) => name.clone(),
        }
    }

    /// The display form: strings quoted, chars quoted, containers
    /// bracketed.
    pub fn str(&self) -> String {
        match self {
            Value::Void => String::from("()"),
            Value::Bool(b) => b.to_string(),
            Value::Char(c) => format!("'{c}'"),
            Value::Integer(x) => x.to_string(),
            Value::Double(x) => Value::format_double(*x),
            Value::Complex(c) => Value::format_complex(*c),
            Value::List(Type::Char, _) => format!("\"{}\"", self.get_string().unwrap_or_default()),
            Value::List(_, xs) | Value::VariadicList(_, xs) => {
                let inner = xs.iter().map(Value::str).collect::<Vec<_>>().join(", ");
                format!("[{inner}]")
            }
            Value::Map(_, _, map) => {
                let inner = map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.str(), v.str()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("[{inner}]")
            }
            Value::Function(sig, name) => format!("fn {name} {sig}"),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Void => 0,
            Value::Bool(_) => 1,
            Value::Char(_) => 2,
            Value::Integer(_) => 3,
            Value::Double(_) => 4,
            Value::Complex(_) => 5,
            Value::List(..) => 6,
            Value::VariadicList(..) => 7,
            Value::Map(..) => 8,
            Value::Function(..) => 9,
        }
    }
}

// total order so values can key ordered maps. doubles order by total_cmp.
impl Ord for Value {
    fn cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Void, Value::Void) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Char(a), Value::Char(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Complex(a), Value::Complex(b)) => a
                .re
                .total_cmp(&b.re)
                .then_with(|| a.im.total_cmp(&b.im)),
            (Value::List(_, a), Value::List(_, b))
            | (Value::VariadicList(_, a), Value::VariadicList(_, b)) => a.cmp(b),
            (Value::Map(_, _, a), Value::Map(_, _, b)) => a.cmp(b),
            (Value::Function(_, a), Value::Function(_, b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Value) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_values() {
        let s = Value::of_string("hi!");
        assert!(s.is_string());
        assert_eq!(s.get_string().unwrap(), "hi!");
        assert_eq!(s.raw_str(), "hi!");
        assert_eq!(s.str(), "\"hi!\"");
    }

    #[test]
    fn test_double_formatting() {
        assert_eq!(Value::Double(3.14).str(), "3.140");
        assert_eq!(Value::Double(0.0).str(), "0.000");
    }

    #[test]
    fn test_complex_formatting() {
        assert_eq!(Value::Complex(Complex::new(1.0, 2.0)).str(), "1.000+2.000i");
        assert_eq!(Value::Complex(Complex::new(1.0, -2.0)).str(), "1.000-2.000i");
        assert_eq!(Value::Complex(Complex::new(1.5, 0.00001)).str(), "1.500");
    }

    #[test]
    fn test_list_formatting() {
        let list = Value::of_list(
            Type::Integer,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)],
        );
        assert_eq!(list.str(), "[1, 2, 3]");
        assert_eq!(list.raw_str(), "1 2 3");
    }

    #[test]
    fn test_casts() {
        assert_eq!(
            Value::Integer(3).cast_to(&Type::Double),
            Some(Value::Double(3.0))
        );
        assert_eq!(Value::Double(1.5).cast_to(&Type::Integer), None);
        assert_eq!(
            Value::Integer(2).cast_to(&Type::Complex),
            Some(Value::Complex(Complex::new(2.0, 0.0)))
        );

        // empty list casts to any list type without retyping
        let empty = Value::empty_list();
        assert!(empty.cast_to(&Type::List(Box::new(Type::Integer))).is_some());
    }

    #[test]
    fn test_default_of() {
        assert_eq!(Value::default_of(&Type::Integer), Some(Value::Integer(0)));
        assert_eq!(
            Value::default_of(&Type::List(Box::new(Type::Char))),
            Some(Value::of_string(""))
        );
        assert!(Value::default_of(&Type::Function(Box::new(Type::Void), vec![])).is_none());
    }

    #[test]
    fn test_value_ordering_for_map_keys() {
        let mut map = BTreeMap::new();
        map.insert(Value::of_string("b"), Value::Integer(2));
        map.insert(Value::of_string("a"), Value::Integer(1));

        let keys: Vec<String> = map.keys().map(|k| k.raw_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_complex_math_identities() {
        let z = Complex::new(0.5, -0.25);

        let exp_ln = z.ln().exp();
        assert!((exp_ln.re - z.re).abs() < 1e-9);
        assert!((exp_ln.im - z.im).abs() < 1e-9);

        let sq = z.sqrt() * z.sqrt();
        assert!((sq.re - z.re).abs() < 1e-9);
        assert!((sq.im - z.im).abs() < 1e-9);

        let sin_asin = z.asin().sin();
        assert!((sin_asin.re - z.re).abs() < 1e-9);
        assert!((sin_asin.im - z.im).abs() < 1e-9);
    }
}
