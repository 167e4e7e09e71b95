//! 设备常量
//!
//! 常量文档是一个树形值（整数 / 布尔 / 字符串 / 结构体 / 列表）。
//! 所有节点保存在根集合 [`ConstRoot`] 的 arena 中，[`Const`] 只是借用根集合的索引，
//! 根集合被释放时所有句柄一起失效（由借用检查器保证）。

use crate::ProtocolError;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Int(i64),
    Bool(bool),
    Str(String),
    Struct(Vec<(String, usize)>),
    List(Vec<usize>),
}

/// 常量根集合（arena）
#[derive(Debug, Clone, PartialEq)]
pub struct ConstRoot {
    nodes: Vec<Node>,
    root: usize,
}

impl ConstRoot {
    /// 从 JSON 文档构建
    ///
    /// 顶层必须是对象；不支持 `null` 和非整数数值。
    pub fn from_json(value: &Value) -> Result<Self, ProtocolError> {
        if !value.is_object() {
            return Err(ProtocolError::InvalidConstants(
                "top level must be an object".to_string(),
            ));
        }
        let mut nodes = Vec::new();
        let root = Self::push(&mut nodes, value, "$")?;
        Ok(Self { nodes, root })
    }

    pub fn from_json_str(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError::InvalidConstants(e.to_string()))?;
        Self::from_json(&value)
    }

    fn push(nodes: &mut Vec<Node>, value: &Value, path: &str) -> Result<usize, ProtocolError> {
        let node = match value {
            Value::Bool(b) => Node::Bool(*b),
            Value::Number(n) => Node::Int(n.as_i64().ok_or_else(|| {
                ProtocolError::InvalidConstants(format!("{}: non-integer number {}", path, n))
            })?),
            Value::String(s) => Node::Str(s.clone()),
            Value::Array(items) => {
                let mut children = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    children.push(Self::push(nodes, item, &format!("{}[{}]", path, i))?);
                }
                Node::List(children)
            },
            Value::Object(map) => {
                let mut fields = Vec::with_capacity(map.len());
                for (key, item) in map {
                    let child = Self::push(nodes, item, &format!("{}.{}", path, key))?;
                    fields.push((key.clone(), child));
                }
                Node::Struct(fields)
            },
            Value::Null => {
                return Err(ProtocolError::InvalidConstants(format!(
                    "{}: null is not a constant",
                    path
                )));
            },
        };
        nodes.push(node);
        Ok(nodes.len() - 1)
    }

    /// 根节点（结构体）
    pub fn root(&self) -> Const<'_> {
        Const {
            arena: self,
            index: self.root,
        }
    }

    /// 顶层字段
    pub fn get(&self, key: &str) -> Option<Const<'_>> {
        self.root().field(key)
    }

    /// 按名称批量查询
    ///
    /// 与输入一一对应，找不到的名称对应 `None`，不影响其他名称。
    pub fn named<'a, S: AsRef<str>>(&'a self, keys: &[S]) -> Vec<Option<Const<'a>>> {
        keys.iter().map(|k| self.get(k.as_ref())).collect()
    }

    /// arena 中的节点总数
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// 指向 [`ConstRoot`] 中某个节点的句柄
#[derive(Debug, Clone, Copy)]
pub struct Const<'a> {
    arena: &'a ConstRoot,
    index: usize,
}

impl<'a> Const<'a> {
    fn node(&self) -> &'a Node {
        &self.arena.nodes[self.index]
    }

    pub fn is_int(&self) -> bool {
        matches!(self.node(), Node::Int(_))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.node(), Node::Bool(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self.node(), Node::Str(_))
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.node(), Node::Struct(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self.node(), Node::List(_))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.node() {
            Node::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.node() {
            Node::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match self.node() {
            Node::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// 结构体字段（非结构体返回 `None`）
    pub fn field(&self, name: &str) -> Option<Const<'a>> {
        match self.node() {
            Node::Struct(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, idx)| Const {
                arena: self.arena,
                index: *idx,
            }),
            _ => None,
        }
    }

    /// 结构体字段名
    pub fn field_names(&self) -> Vec<&'a str> {
        match self.node() {
            Node::Struct(fields) => fields.iter().map(|(k, _)| k.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// 列表长度（非列表为 0）
    pub fn list_len(&self) -> usize {
        match self.node() {
            Node::List(items) => items.len(),
            _ => 0,
        }
    }

    pub fn list_element(&self, position: usize) -> Option<Const<'a>> {
        match self.node() {
            Node::List(items) => items.get(position).map(|idx| Const {
                arena: self.arena,
                index: *idx,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "max_volume": 12,
        "has_display": false,
        "product": "Evolve2 85",
        "buttons": ["mute", "hook", 3],
        "audio": { "sample_rate": 16000, "codecs": ["g722"] }
    }"#;

    #[test]
    fn test_typed_access() {
        let root = ConstRoot::from_json_str(DOC).unwrap();
        let max = root.get("max_volume").unwrap();
        assert!(max.is_int());
        assert_eq!(max.as_int(), Some(12));
        assert_eq!(max.as_bool(), None);

        assert_eq!(root.get("has_display").unwrap().as_bool(), Some(false));
        assert_eq!(root.get("product").unwrap().as_str(), Some("Evolve2 85"));
    }

    #[test]
    fn test_nested_struct_and_list() {
        let root = ConstRoot::from_json_str(DOC).unwrap();
        let buttons = root.get("buttons").unwrap();
        assert!(buttons.is_list());
        assert_eq!(buttons.list_len(), 3);
        assert_eq!(buttons.list_element(1).unwrap().as_str(), Some("hook"));
        assert_eq!(buttons.list_element(2).unwrap().as_int(), Some(3));
        assert!(buttons.list_element(3).is_none());

        let audio = root.get("audio").unwrap();
        assert!(audio.is_struct());
        assert_eq!(audio.field("sample_rate").unwrap().as_int(), Some(16000));
        let codecs = audio.field("codecs").unwrap();
        assert_eq!(codecs.list_element(0).unwrap().as_str(), Some("g722"));
    }

    #[test]
    fn test_named_partial_failure() {
        let root = ConstRoot::from_json_str(DOC).unwrap();
        let found = root.named(&["product", "missing", "max_volume"]);
        assert_eq!(found.len(), 3);
        assert!(found[0].is_some());
        assert!(found[1].is_none());
        assert_eq!(found[2].unwrap().as_int(), Some(12));
    }

    #[test]
    fn test_rejects_invalid_documents() {
        assert!(ConstRoot::from_json_str("[1, 2]").is_err());
        assert!(ConstRoot::from_json_str(r#"{"a": null}"#).is_err());
        assert!(ConstRoot::from_json_str(r#"{"a": 1.5}"#).is_err());
        assert!(ConstRoot::from_json_str("not json").is_err());
    }
}
