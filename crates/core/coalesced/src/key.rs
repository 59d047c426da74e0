//! Key strategies used to decide which calls coalesce.
//!
//! The default strategy hashes the canonical JSON form of the arguments, so two
//! calls share an operation only if their arguments serialize identically. The
//! structural join strategy is cheaper to read in logs but loses type information.

use std::{fmt, sync::Arc};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::Error;

/// Name used for operations that were not given one
pub const ANONYMOUS: &str = "anonymous";

/// Derivation function, receives the operation name and the call arguments
pub type DeriveFn<Args, Id> = Arc<dyn Fn(&str, &Args) -> Result<Id, Error> + Send + Sync>;

/// How a call is mapped to the identifier it coalesces under.
pub enum KeyStrategy<Args, Id = String> {
    /// Derive the identifier from the operation name and arguments
    Derive(DeriveFn<Args, Id>),
    /// Use the same identifier for every call
    Fixed(Id),
}

impl<Args, Id: Clone> KeyStrategy<Args, Id> {
    /// Use a custom derivation function
    pub fn custom<F>(derive: F) -> Self
    where
        F: Fn(&str, &Args) -> Result<Id, Error> + Send + Sync + 'static,
    {
        KeyStrategy::Derive(Arc::new(derive))
    }

    /// Coalesce every call under `id`, ignoring the arguments
    pub fn fixed(id: Id) -> Self {
        KeyStrategy::Fixed(id)
    }

    /// Compute the identifier for a single call
    pub fn derive(&self, name: &str, args: &Args) -> Result<Id, Error> {
        match self {
            KeyStrategy::Derive(derive) => derive(name, args),
            KeyStrategy::Fixed(id) => Ok(id.clone()),
        }
    }
}

impl<Args: Serialize + 'static> KeyStrategy<Args, String> {
    /// Name joined with a SHA-256 digest of the canonical JSON arguments
    ///
    /// Arguments that only differ in values JSON writes as `null` share a key,
    /// see [`content_hash_key`].
    pub fn content_hash() -> Self {
        KeyStrategy::custom(|name, args| content_hash_key(name, args))
    }

    /// Name joined with the string form of each argument
    pub fn joined() -> Self {
        KeyStrategy::custom(|name, args| joined_key(name, args))
    }
}

impl<Args: Serialize + 'static> Default for KeyStrategy<Args, String> {
    fn default() -> Self {
        Self::content_hash()
    }
}

impl<Args, Id: Clone> Clone for KeyStrategy<Args, Id> {
    fn clone(&self) -> Self {
        match self {
            KeyStrategy::Derive(derive) => KeyStrategy::Derive(derive.clone()),
            KeyStrategy::Fixed(id) => KeyStrategy::Fixed(id.clone()),
        }
    }
}

impl<Args, Id: fmt::Debug> fmt::Debug for KeyStrategy<Args, Id> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStrategy::Derive(_) => f.write_str("Derive(..)"),
            KeyStrategy::Fixed(id) => f.debug_tuple("Fixed").field(id).finish(),
        }
    }
}

/// Fall back to [`ANONYMOUS`] for empty operation names
pub fn operation_name(name: &str) -> &str {
    if name.is_empty() {
        ANONYMOUS
    } else {
        name
    }
}

/// Serialize into a JSON value with object keys sorted at every depth
///
/// Sorting is done here rather than relied upon from `serde_json::Map`, whose
/// ordering changes when `preserve_order` is enabled anywhere in the build.
fn canonical<A: Serialize + ?Sized>(args: &A) -> Result<Value, Error> {
    fn sort(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.into_iter().collect();
                entries.sort_by(|(a, _), (b, _)| a.cmp(b));
                Value::Object(entries.into_iter().map(|(k, v)| (k, sort(v))).collect())
            }
            Value::Array(items) => Value::Array(items.into_iter().map(sort).collect()),
            other => other,
        }
    }

    serde_json::to_value(args)
        .map(sort)
        .map_err(|e| Error::KeyDerivation(e.to_string()))
}

/// Build `{name}-{sha256(canonical json)}`
///
/// Tuples and sequences are encoded as JSON arrays, so `("lorem",)` hashes the
/// bytes `["lorem"]`. Integers of any width, `u128` included, keep their exact
/// value.
///
/// Values JSON can only write as `null` collide: `None` and `Some(None)` of an
/// `Option<Option<T>>`, or `None`, `NaN` and the infinities of an `Option<f64>`.
/// Use a custom strategy if such arguments must stay apart.
pub fn content_hash_key<A: Serialize + ?Sized>(name: &str, args: &A) -> Result<String, Error> {
    let encoded = serde_json::to_vec(&canonical(args)?)
        .map_err(|e| Error::KeyDerivation(e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    let hash = hasher.finalize();

    Ok(format!("{}-{hash:02x}", operation_name(name)))
}

/// Build `{name}-{arg}-{arg}...`
///
/// Strings are used verbatim and `null` renders empty, so `1` and `"1"` produce
/// the same key. Only use this for argument lists of one consistent type.
pub fn joined_key<A: Serialize + ?Sized>(name: &str, args: &A) -> Result<String, Error> {
    fn render(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    let joined = match canonical(args)? {
        Value::Array(items) => items.iter().map(render).collect::<Vec<_>>().join("-"),
        single => render(&single),
    };

    Ok(format!("{}-{joined}", operation_name(name)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn content_hash_matches_known_digest() {
        assert_eq!(
            content_hash_key("a", &("lorem", "ipsum", "dolor sit amet")).unwrap(),
            "a-91f967512ad54d194006a3cacf3a94d7f9c4ded44bb194c1e9e0fb1c21cb9a37"
        );
    }

    #[test]
    fn unnamed_operations_are_anonymous() {
        assert_eq!(
            content_hash_key("", &("lorem",)).unwrap(),
            "anonymous-0d0491105dd08721e0911939ca184e9e5a6f924b00dce27a4163ca333049bf20"
        );
        assert_eq!(joined_key("", &("lorem",)).unwrap(), "anonymous-lorem");
    }

    #[test]
    fn content_hash_keeps_types_apart() {
        let number = content_hash_key("get", &(1,)).unwrap();
        let string = content_hash_key("get", &("1",)).unwrap();
        assert_ne!(number, string);

        // The join strategy cannot tell them apart
        assert_eq!(joined_key("get", &(1,)).unwrap(), joined_key("get", &("1",)).unwrap());
    }

    #[test]
    fn content_hash_ignores_map_order() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for i in 0..32 {
            first.insert(format!("k{i}"), i);
        }
        for i in (0..32).rev() {
            second.insert(format!("k{i}"), i);
        }

        assert_eq!(
            content_hash_key("get", &(&first,)).unwrap(),
            content_hash_key("get", &(&second,)).unwrap()
        );
    }

    #[test]
    fn wide_integers_hash_exactly() {
        let max = content_hash_key("get", &(u128::MAX,)).unwrap();
        let below = content_hash_key("get", &(u128::MAX - 1,)).unwrap();
        assert_ne!(max, below);
        assert!(content_hash_key("get", &(i128::MIN,)).is_ok());

        assert_eq!(
            joined_key("get", &(u128::MAX,)).unwrap(),
            "get-340282366920938463463374607431768211455"
        );
    }

    #[test]
    fn nested_objects_are_sorted() {
        let mut inner_first = serde_json::Map::new();
        inner_first.insert("z".to_string(), Value::from(1));
        inner_first.insert("a".to_string(), Value::from(2));
        let mut inner_second = serde_json::Map::new();
        inner_second.insert("a".to_string(), Value::from(2));
        inner_second.insert("z".to_string(), Value::from(1));

        let first = canonical(&(vec![Value::Object(inner_first)],)).unwrap();
        let second = canonical(&(vec![Value::Object(inner_second)],)).unwrap();

        assert_eq!(first.to_string(), r#"[[{"a":2,"z":1}]]"#);
        assert_eq!(first.to_string(), second.to_string());
    }

    #[test]
    fn null_like_values_share_a_key() {
        // Documented limitation of the JSON encoding
        assert_eq!(
            content_hash_key("get", &(None::<Option<u8>>,)).unwrap(),
            content_hash_key("get", &(Some(None::<u8>),)).unwrap()
        );
        assert_eq!(
            content_hash_key("get", &(Some(f64::NAN),)).unwrap(),
            content_hash_key("get", &(None::<f64>,)).unwrap()
        );
        assert_ne!(
            content_hash_key("get", &(Some(Some(0u8)),)).unwrap(),
            content_hash_key("get", &(Some(None::<u8>),)).unwrap()
        );
    }

    #[test]
    fn joined_renders_like_string_join() {
        assert_eq!(
            joined_key("get", &("lorem", 2, None::<u8>, true)).unwrap(),
            "get-lorem-2--true"
        );
        assert_eq!(joined_key("get", &"single").unwrap(), "get-single");
    }

    #[test]
    fn unrepresentable_arguments_fail_derivation() {
        let mut map = HashMap::new();
        map.insert((1, 2), "tuple keys are not valid JSON object keys");

        assert!(matches!(
            content_hash_key("get", &map),
            Err(Error::KeyDerivation(_))
        ));
    }

    #[test]
    fn strategies_derive() {
        let fixed: KeyStrategy<(u32, u32)> = KeyStrategy::fixed("X".to_string());
        assert_eq!(fixed.derive("get", &(1, 2)).unwrap(), "X");
        assert_eq!(fixed.derive("get", &(3, 4)).unwrap(), "X");

        let custom: KeyStrategy<(u32, u32), u32> = KeyStrategy::custom(|_, (a, b)| Ok(a + b));
        assert_eq!(custom.derive("get", &(1, 2)).unwrap(), 3);

        let default: KeyStrategy<(&str,)> = KeyStrategy::default();
        assert_eq!(
            default.derive("a", &("lorem",)).unwrap(),
            content_hash_key("a", &("lorem",)).unwrap()
        );
    }
}
