use crate::string::SmallString;

pub type NodeId = usize;

/// What a node holds. Tag and attribute names are stored lowercase; the
/// serializer owns the uppercase presentation.
#[derive(Debug, Clone)]
pub enum NodeData {
    Root,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Element {
    pub tag: SmallString,
    pub attrs: Vec<(SmallString, String)>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: SmallString::new(tag),
            attrs: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(attr_name, _)| &**attr_name == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: String) {
        match self.attrs.iter_mut().find(|(attr_name, _)| &**attr_name == name) {
            Some((_, slot)) => *slot = value,
            None => self.attrs.push((SmallString::new(name), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) {
        self.attrs.retain(|(attr_name, _)| &**attr_name != name);
    }
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: NodeData,
}

/*
    An arena DOM: nodes live in one Vec and refer to each other by index,
    so structural edits during traversal are cheap and never fight the
    borrow checker the way an owning pointer graph would. Detached nodes
    simply become unreachable; the arena is request-scoped and freed
    wholesale.
*/
pub struct Dom {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Dom {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                data: NodeData::Root,
            }],
            root: 0,
        }
    }

    /// Builds an arena from the external parser's output. Comments,
    /// doctypes and processing instructions are discarded here; everything
    /// else is subject to the rewrite pass.
    pub fn parse(source: &str) -> Self {
        let parsed = scraper::Html::parse_document(source);
        let mut dom = Self::new();
        let root = dom.root;
        dom.convert_children(parsed.tree.root(), root);
        dom
    }

    fn convert_children(&mut self, source: ego_tree::NodeRef<'_, scraper::Node>, parent: NodeId) {
        for child in source.children() {
            match child.value() {
                scraper::Node::Element(element) => {
                    let mut converted = Element::new(element.name());
                    converted.attrs = element
                        .attrs()
                        .map(|(name, value)| (SmallString::new(name).to_lowercase(), String::from(value)))
                        .collect();
                    let id = self.push(parent, NodeData::Element(converted));
                    self.convert_children(child, id);
                }
                scraper::Node::Text(text) => {
                    self.push(parent, NodeData::Text(text.to_string()));
                }
                _ => (),
            }
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id].data
    }

    pub fn data_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id].data
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id].data {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id].data {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    fn push(&mut self, parent: NodeId, data: NodeData) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            data,
        });
        self.nodes[parent].children.push(id);
        id
    }

    /// Creates a detached element node.
    pub fn create_element(&mut self, element: Element) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            data: NodeData::Element(element),
        });
        id
    }

    /// Creates a detached text node.
    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            data: NodeData::Text(text.into()),
        });
        id
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        debug_assert!(self.nodes[child].parent.is_none());
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
    }

    /// Removes a node and its whole subtree from the document.
    pub fn delete(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id].parent.take() {
            self.nodes[parent].children.retain(|&child| child != id);
        }
    }

    /// Removes a node but splices its children into the parent at the
    /// node's former position, preserving document order.
    pub fn strip(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id].parent.take() else {
            return;
        };
        let children = std::mem::take(&mut self.nodes[id].children);
        for &child in &children {
            self.nodes[child].parent = Some(parent);
        }

        let position = self.nodes[parent]
            .children
            .iter()
            .position(|&child| child == id)
            .expect("node must be among its parent's children");
        self.nodes[parent].children.splice(position..=position, children);
    }

    /// Replaces a node (subtree included) with a sequence of other nodes.
    pub fn replace_with(&mut self, id: NodeId, replacements: Vec<NodeId>) {
        let Some(parent) = self.nodes[id].parent.take() else {
            return;
        };
        for &node in &replacements {
            debug_assert!(self.nodes[node].parent.is_none());
            self.nodes[node].parent = Some(parent);
        }

        let position = self.nodes[parent]
            .children
            .iter()
            .position(|&child| child == id)
            .expect("node must be among its parent's children");
        self.nodes[parent].children.splice(position..=position, replacements);
    }

    /// Detaches every child of `id`, returning them in document order.
    pub fn take_children(&mut self, id: NodeId) -> Vec<NodeId> {
        let children = std::mem::take(&mut self.nodes[id].children);
        for &child in &children {
            self.nodes[child].parent = None;
        }
        children
    }

    /// Whether any element named `tag` exists strictly below `id`.
    pub fn has_descendant_tag(&self, id: NodeId, tag: &str) -> bool {
        self.children(id).iter().any(|&child| {
            matches!(self.element(child), Some(element) if &*element.tag == tag) || self.has_descendant_tag(child, tag)
        })
    }

    /// Concatenated text of the subtree rooted at `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id].data {
            NodeData::Text(text) => out.push_str(text),
            _ => {
                for &child in self.children(id) {
                    self.collect_text(child, out);
                }
            }
        }
    }

    /// Document-order ids of elements named `tag`, for tests and passes
    /// that must not hold borrows while mutating.
    pub fn elements_named(&self, tag: &str) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.walk_collect(self.root, tag, &mut out);
        out
    }

    fn walk_collect(&self, id: NodeId, tag: &str, out: &mut Vec<NodeId>) {
        if matches!(self.element(id), Some(element) if &*element.tag == tag) {
            out.push(id);
        }
        for &child in self.children(id) {
            self.walk_collect(child, tag, out);
        }
    }
}
