/// Serializes a map of named elements as a plain JSON array, keyed back on
/// deserialization by the given field of each element. Keeps the wire format
/// an ordered list while the in-memory form stays an index.
#[macro_export]
macro_rules! serde_map_as_vec {
    (mod $mod:ident, $map:ident<$key:ty, $elem:ty>, $key_field:ident) => {
        pub mod $mod {
            use ::serde::de::{Deserialize, Deserializer};
            use ::serde::ser::{Serialize, Serializer};
            use super::*;

            pub fn serialize<S: Serializer>(
                map: &$map<$key, $elem>,
                serializer: S,
            ) -> Result<S::Ok, S::Error> {
                let vec = map.values().collect::<Vec<&$elem>>();
                vec.serialize(serializer)
            }

            pub fn deserialize<'de, D: Deserializer<'de>>(
                deserializer: D,
            ) -> Result<$map<$key, $elem>, D::Error> {
                let vec = Vec::<$elem>::deserialize(deserializer)?;
                Ok(vec.into_iter().map(|e| (e.$key_field.clone(), e)).collect())
            }
        }
    }
}
