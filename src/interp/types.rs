//! The type system of the command language.
//!
//! Types are structural: two list types are the same when their element
//! types are, and function types compare by arity plus element-wise
//! comparison. `str` is just `[char]`.

/// A language type. `Generic` carries the parameter name and the overload
/// group it was declared in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Bool,
    Char,
    Integer,
    Double,
    Complex,
    List(Box<Type>),
    VariadicList(Box<Type>),
    Map(Box<Type>, Box<Type>),
    /// return type, argument types.
    Function(Box<Type>, Vec<Type>),
    Generic(String, u64),
}

impl Type {
    pub fn string() -> Type {
        Type::List(Box::new(Type::Char))
    }

    /// Macros take a list of strings and produce a list of strings.
    pub fn macro_function() -> Type {
        let list_of_str = Type::List(Box::new(Type::string()));
        Type::Function(Box::new(list_of_str.clone()), vec![list_of_str])
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Type::List(_) | Type::VariadicList(_))
    }

    pub fn is_variadic_list(&self) -> bool {
        matches!(self, Type::VariadicList(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Type::Map(..))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Type::List(elm) if **elm == Type::Char)
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Type::Function(..))
    }

    pub fn is_generic(&self) -> bool {
        matches!(self, Type::Generic(..))
    }

    pub fn elm_type(&self) -> Option<&Type> {
        match self {
            Type::List(elm) | Type::VariadicList(elm) => Some(elm),
            Type::Map(_, elm) => Some(elm),
            _ => None,
        }
    }

    pub fn key_type(&self) -> Option<&Type> {
        match self {
            Type::Map(key, _) => Some(key),
            _ => None,
        }
    }

    pub fn ret_type(&self) -> Option<&Type> {
        match self {
            Type::Function(ret, _) => Some(ret),
            _ => None,
        }
    }

    pub fn arg_types(&self) -> &[Type] {
        match self {
            Type::Function(_, args) => args,
            _ => &[],
        }
    }

    pub fn has_generics(&self) -> bool {
        match self {
            Type::Generic(..) => true,
            Type::List(elm) | Type::VariadicList(elm) => elm.has_generics(),
            Type::Map(key, elm) => key.has_generics() || elm.has_generics(),
            Type::Function(ret, args) => {
                ret.has_generics() || args.iter().any(Type::has_generics)
            }
            _ => false,
        }
    }

    /// Structural sameness. List and variadic-list types with the same
    /// element type count as the same, so a trailing `[T...]` parameter
    /// accepts a `[T]` argument unchanged.
    pub fn is_same(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::List(a) | Type::VariadicList(a), Type::List(b) | Type::VariadicList(b)) => {
                a.is_same(b)
            }
            (Type::Map(ka, va), Type::Map(kb, vb)) => ka.is_same(kb) && va.is_same(vb),
            (Type::Function(ra, aa), Type::Function(rb, ab)) => {
                ra.is_same(rb)
                    && aa.len() == ab.len()
                    && aa.iter().zip(ab).all(|(x, y)| x.is_same(y))
            }
            (Type::Generic(na, ga), Type::Generic(nb, gb)) => na == nb && ga == gb,
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }

    /// How expensive it is to cast a value of this type to `other`; smaller
    /// is better, `None` means not castable. Used for overload resolution.
    pub fn cast_distance(&self, other: &Type) -> Option<u32> {
        if self.is_same(other) {
            return Some(0);
        }

        match (self, other) {
            (Type::Integer, Type::Double) => Some(1),
            (Type::Integer | Type::Double, Type::Complex) => Some(2),

            (a, b) if a.is_list() && b.is_list() => {
                let (ae, be) = (a.elm_type().unwrap(), b.elm_type().unwrap());

                // [void] doubles as the anonymous "any list" placeholder,
                // and is what an empty list literal gets.
                if ae.is_void() || be.is_void() {
                    Some(2)
                } else if be.is_generic() {
                    Some(10)
                } else {
                    None
                }
            }

            (Type::Map(ka, va), Type::Map(kb, vb)) => {
                if ka.is_same(kb) && vb.is_void() {
                    Some(2)
                } else if va.is_same(vb) && kb.is_void() {
                    Some(2)
                } else if kb.is_void() && vb.is_void() {
                    Some(3)
                } else if kb.is_generic() && vb.is_generic() {
                    Some(20)
                } else if kb.is_generic() || vb.is_generic() {
                    Some(10)
                } else {
                    None
                }
            }

            (Type::Function(_, aa), Type::Function(_, ab)) => {
                if aa.len() != ab.len() {
                    return None;
                }

                let mut sum = 0;
                for (x, y) in aa.iter().zip(ab) {
                    sum += x.cast_distance(y)?;
                }
                Some(sum)
            }

            (_, Type::Generic(..)) => Some(10),

            _ => None,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Bool => write!(f, "bool"),
            Type::Char => write!(f, "char"),
            Type::Integer => write!(f, "int"),
            Type::Double => write!(f, "double"),
            Type::Complex => write!(f, "complex"),
            Type::List(elm) if **elm == Type::Char => write!(f, "str"),
            Type::List(elm) => write!(f, "[{elm}]"),
            Type::VariadicList(elm) => write!(f, "[{elm}...]"),
            Type::Map(key, elm) => write!(f, "[{key}: {elm}]"),
            Type::Generic(name, _) => write!(f, "{name}"),
            Type::Function(ret, args) => {
                write!(f, "(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ") -> {ret}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Type::string().to_string(), "str");
        assert_eq!(Type::List(Box::new(Type::Integer)).to_string(), "[int]");
        assert_eq!(
            Type::Map(Box::new(Type::string()), Box::new(Type::Integer)).to_string(),
            "[str: int]"
        );
        assert_eq!(
            Type::Function(Box::new(Type::Integer), vec![Type::Double, Type::Bool]).to_string(),
            "(double, bool) -> int"
        );
        assert_eq!(
            Type::VariadicList(Box::new(Type::Char)).to_string(),
            "[char...]"
        );
    }

    #[test]
    fn test_cast_distance_numeric_ladder() {
        assert_eq!(Type::Integer.cast_distance(&Type::Integer), Some(0));
        assert_eq!(Type::Integer.cast_distance(&Type::Double), Some(1));
        assert_eq!(Type::Integer.cast_distance(&Type::Complex), Some(2));
        assert_eq!(Type::Double.cast_distance(&Type::Complex), Some(2));
        assert_eq!(Type::Double.cast_distance(&Type::Integer), None);
        assert_eq!(Type::Bool.cast_distance(&Type::Integer), None);
    }

    #[test]
    fn test_cast_distance_void_lists() {
        let void_list = Type::List(Box::new(Type::Void));
        let int_list = Type::List(Box::new(Type::Integer));
        assert_eq!(void_list.cast_distance(&int_list), Some(2));
        assert_eq!(int_list.cast_distance(&void_list), Some(2));
        assert_eq!(
            int_list.cast_distance(&Type::List(Box::new(Type::Generic(String::from("T"), 0)))),
            Some(10)
        );
        assert_eq!(int_list.cast_distance(&Type::List(Box::new(Type::Double))), None);
    }

    #[test]
    fn test_cast_distance_generic_catchall() {
        let t = Type::Generic(String::from("T"), 0);
        assert_eq!(Type::Integer.cast_distance(&t), Some(10));
        assert_eq!(Type::string().cast_distance(&t), Some(10));
    }

    #[test]
    fn test_variadic_same_as_list() {
        let list = Type::List(Box::new(Type::Integer));
        let variadic = Type::VariadicList(Box::new(Type::Integer));
        assert!(list.is_same(&variadic));
        assert_eq!(list.cast_distance(&variadic), Some(0));
    }
}
