//! Shape of a serializable value, recorded through its `Serialize` impl.
//!
//! The validator needs to know which leaves of a blueprint or options struct
//! are set and under which dotted path. Serializing into a `Node` tree keeps
//! the distinction between struct fields (`a.b`), sequence elements (`a[0]`)
//! and map entries (`a{key}`) that a generic JSON value would lose.

use serde::ser::{self, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// `None`, unit, `false`, `0`, `""` and the default enum variant.
    Zero,
    Scalar,
    Some(Box<Node>),
    Seq(Vec<Node>),
    Map(Vec<(String, Node)>),
    Struct(Vec<(String, Node)>),
}

/// A set leaf. `presence` marks an `Option` that is `Some` but holds only
/// zero values; it counts as set but carries no deeper path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    pub path: String,
    pub presence: bool,
}

#[derive(Debug)]
pub struct WalkError(String);

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for WalkError {}

impl ser::Error for WalkError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        WalkError(msg.to_string())
    }
}

pub fn to_node<T: Serialize + ?Sized>(value: &T) -> Result<Node, WalkError> {
    value.serialize(NodeSerializer)
}

impl Node {
    /// Every set leaf in serialization order.
    pub fn leaves(&self) -> Vec<Leaf> {
        let mut out = Vec::new();
        self.collect("", &mut out);
        out
    }

    pub fn is_set(&self) -> bool {
        !self.leaves().is_empty()
    }

    fn collect(&self, path: &str, out: &mut Vec<Leaf>) {
        match self {
            Node::Zero => {}
            Node::Scalar => out.push(Leaf {
                path: path.to_owned(),
                presence: false,
            }),
            Node::Some(inner) => {
                let before = out.len();
                inner.collect(path, out);
                if out.len() == before && !path.is_empty() {
                    out.push(Leaf {
                        path: path.to_owned(),
                        presence: true,
                    });
                }
            }
            Node::Seq(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.collect(&format!("{path}[{i}]"), out);
                }
            }
            Node::Map(entries) => {
                for (key, value) in entries {
                    value.collect(&format!("{path}{{{key}}}"), out);
                }
            }
            Node::Struct(fields) => {
                for (name, value) in fields {
                    let child = if path.is_empty() {
                        name.clone()
                    } else {
                        format!("{path}.{name}")
                    };
                    value.collect(&child, out);
                }
            }
        }
    }

    /// Follow a dotted path of field or key names through `Some` wrappers.
    pub fn get(&self, dotted: &str) -> Option<&Node> {
        let mut node = self;
        for segment in dotted.split('.') {
            while let Node::Some(inner) = node {
                node = inner;
            }
            node = match node {
                Node::Struct(entries) | Node::Map(entries) => {
                    entries.iter().find(|(k, _)| k == segment).map(|(_, v)| v)?
                }
                _ => return None,
            };
        }
        Some(node)
    }
}

fn scalar(zero: bool) -> Node {
    if zero {
        Node::Zero
    } else {
        Node::Scalar
    }
}

fn wrap(variant: Option<&'static str>, node: Node) -> Node {
    match variant {
        Some(name) => Node::Struct(vec![(name.to_owned(), node)]),
        None => node,
    }
}

fn key_string<T: Serialize + ?Sized>(key: &T) -> Result<String, WalkError> {
    match serde_json::to_value(key).map_err(|e| WalkError(e.to_string()))? {
        serde_json::Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

struct NodeSerializer;

struct SeqBuilder {
    items: Vec<Node>,
    variant: Option<&'static str>,
}

struct StructBuilder {
    fields: Vec<(String, Node)>,
    variant: Option<&'static str>,
}

struct MapBuilder {
    entries: Vec<(String, Node)>,
    key: Option<String>,
}

impl ser::Serializer for NodeSerializer {
    type Ok = Node;
    type Error = WalkError;
    type SerializeSeq = SeqBuilder;
    type SerializeTuple = SeqBuilder;
    type SerializeTupleStruct = SeqBuilder;
    type SerializeTupleVariant = SeqBuilder;
    type SerializeMap = MapBuilder;
    type SerializeStruct = StructBuilder;
    type SerializeStructVariant = StructBuilder;

    fn serialize_bool(self, v: bool) -> Result<Node, WalkError> {
        Ok(scalar(!v))
    }

    fn serialize_i8(self, v: i8) -> Result<Node, WalkError> {
        Ok(scalar(v == 0))
    }

    fn serialize_i16(self, v: i16) -> Result<Node, WalkError> {
        Ok(scalar(v == 0))
    }

    fn serialize_i32(self, v: i32) -> Result<Node, WalkError> {
        Ok(scalar(v == 0))
    }

    fn serialize_i64(self, v: i64) -> Result<Node, WalkError> {
        Ok(scalar(v == 0))
    }

    fn serialize_u8(self, v: u8) -> Result<Node, WalkError> {
        Ok(scalar(v == 0))
    }

    fn serialize_u16(self, v: u16) -> Result<Node, WalkError> {
        Ok(scalar(v == 0))
    }

    fn serialize_u32(self, v: u32) -> Result<Node, WalkError> {
        Ok(scalar(v == 0))
    }

    fn serialize_u64(self, v: u64) -> Result<Node, WalkError> {
        Ok(scalar(v == 0))
    }

    #[allow(clippy::float_cmp)]
    fn serialize_f32(self, v: f32) -> Result<Node, WalkError> {
        Ok(scalar(v == 0.0))
    }

    #[allow(clippy::float_cmp)]
    fn serialize_f64(self, v: f64) -> Result<Node, WalkError> {
        Ok(scalar(v == 0.0))
    }

    fn serialize_char(self, v: char) -> Result<Node, WalkError> {
        Ok(scalar(v == '\0'))
    }

    fn serialize_str(self, v: &str) -> Result<Node, WalkError> {
        Ok(scalar(v.is_empty()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Node, WalkError> {
        Ok(scalar(v.is_empty()))
    }

    fn serialize_none(self) -> Result<Node, WalkError> {
        Ok(Node::Zero)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Node, WalkError> {
        Ok(Node::Some(Box::new(value.serialize(NodeSerializer)?)))
    }

    fn serialize_unit(self) -> Result<Node, WalkError> {
        Ok(Node::Zero)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Node, WalkError> {
        Ok(Node::Zero)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<Node, WalkError> {
        Ok(scalar(variant.is_empty()))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Node, WalkError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Node, WalkError> {
        Ok(wrap(Some(variant), value.serialize(NodeSerializer)?))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqBuilder, WalkError> {
        Ok(SeqBuilder {
            items: Vec::with_capacity(len.unwrap_or(0)),
            variant: None,
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqBuilder, WalkError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SeqBuilder, WalkError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<SeqBuilder, WalkError> {
        Ok(SeqBuilder {
            items: Vec::with_capacity(len),
            variant: Some(variant),
        })
    }

    fn serialize_map(self, len: Option<usize>) -> Result<MapBuilder, WalkError> {
        Ok(MapBuilder {
            entries: Vec::with_capacity(len.unwrap_or(0)),
            key: None,
        })
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<StructBuilder, WalkError> {
        Ok(StructBuilder {
            fields: Vec::with_capacity(len),
            variant: None,
        })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<StructBuilder, WalkError> {
        Ok(StructBuilder {
            fields: Vec::with_capacity(len),
            variant: Some(variant),
        })
    }
}

impl ser::SerializeSeq for SeqBuilder {
    type Ok = Node;
    type Error = WalkError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), WalkError> {
        self.items.push(value.serialize(NodeSerializer)?);
        Ok(())
    }

    fn end(self) -> Result<Node, WalkError> {
        Ok(wrap(self.variant, Node::Seq(self.items)))
    }
}

impl ser::SerializeTuple for SeqBuilder {
    type Ok = Node;
    type Error = WalkError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), WalkError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Node, WalkError> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SeqBuilder {
    type Ok = Node;
    type Error = WalkError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), WalkError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Node, WalkError> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleVariant for SeqBuilder {
    type Ok = Node;
    type Error = WalkError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), WalkError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Node, WalkError> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeMap for MapBuilder {
    type Ok = Node;
    type Error = WalkError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), WalkError> {
        self.key = Some(key_string(key)?);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), WalkError> {
        let key = self
            .key
            .take()
            .ok_or_else(|| WalkError("map value without a key".to_owned()))?;
        self.entries.push((key, value.serialize(NodeSerializer)?));
        Ok(())
    }

    fn end(self) -> Result<Node, WalkError> {
        Ok(Node::Map(self.entries))
    }
}

impl ser::SerializeStruct for StructBuilder {
    type Ok = Node;
    type Error = WalkError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), WalkError> {
        self.fields
            .push((key.to_owned(), value.serialize(NodeSerializer)?));
        Ok(())
    }

    fn end(self) -> Result<Node, WalkError> {
        Ok(wrap(self.variant, Node::Struct(self.fields)))
    }
}

impl ser::SerializeStructVariant for StructBuilder {
    type Ok = Node;
    type Error = WalkError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), WalkError> {
        ser::SerializeStruct::serialize_field(self, key, value)
    }

    fn end(self) -> Result<Node, WalkError> {
        ser::SerializeStruct::end(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::collections::BTreeMap;

    #[derive(Serialize, Default)]
    struct Inner {
        name: String,
        enabled: bool,
    }

    #[derive(Serialize, Default)]
    struct Outer {
        count: u32,
        inner: Option<Inner>,
        list: Vec<Inner>,
        facts: BTreeMap<String, String>,
    }

    fn paths(node: &Node) -> Vec<String> {
        node.leaves().into_iter().map(|l| l.path).collect()
    }

    #[test]
    fn zero_value_has_no_leaves() {
        let node = to_node(&Outer::default()).unwrap();
        assert!(node.leaves().is_empty());
    }

    #[test]
    fn records_field_index_and_key_segments() {
        let mut facts = BTreeMap::new();
        facts.insert("team".to_owned(), "infra".to_owned());
        let value = Outer {
            count: 3,
            inner: Some(Inner {
                name: "x".to_owned(),
                enabled: false,
            }),
            list: vec![
                Inner::default(),
                Inner {
                    name: String::new(),
                    enabled: true,
                },
            ],
            facts,
        };
        let node = to_node(&value).unwrap();
        assert_eq!(
            paths(&node),
            vec!["count", "inner.name", "list[1].enabled", "facts{team}"]
        );
    }

    #[test]
    fn empty_some_is_a_presence_leaf() {
        let value = Outer {
            inner: Some(Inner::default()),
            ..Default::default()
        };
        let leaves = to_node(&value).unwrap().leaves();
        assert_eq!(
            leaves,
            vec![Leaf {
                path: "inner".to_owned(),
                presence: true
            }]
        );
    }

    #[test]
    fn get_follows_options() {
        let value = Outer {
            inner: Some(Inner {
                name: "x".to_owned(),
                enabled: false,
            }),
            ..Default::default()
        };
        let node = to_node(&value).unwrap();
        assert!(node.get("inner.name").unwrap().is_set());
        assert!(!node.get("inner.enabled").unwrap().is_set());
        assert!(node.get("inner.missing").is_none());
    }
}
