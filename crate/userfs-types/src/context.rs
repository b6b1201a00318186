/// Identity of a file, chosen by the provider.
///
/// All opens of the same file usually share a node handle. The
/// framework never interprets the value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default)]
pub struct NodeHandle(pub u64);

/// Identity of one open instance of a file, chosen by the provider.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default)]
pub struct DescriptorHandle(pub u64);

/// The pair of handles identifying one open file to the provider.
///
/// Created by the provider in Create or Open, passed back unchanged to
/// every later operation on that open and released by the provider in
/// Close.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct FileContext {
    pub node: NodeHandle,
    pub descriptor: DescriptorHandle,
}

impl FileContext {
    pub fn new(node: u64, descriptor: u64) -> Self {
        Self {
            node: NodeHandle(node),
            descriptor: DescriptorHandle(descriptor),
        }
    }

    /// True for the zero context, which the host uses for "no file".
    pub fn is_null(&self) -> bool {
        self.node.0 == 0 && self.descriptor.0 == 0
    }
}

/// Two-word context slot carried by the host in every transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct FullContext {
    pub user_context: u64,
    pub user_context2: u64,
}

impl From<FullContext> for FileContext {
    fn from(value: FullContext) -> Self {
        FileContext::new(value.user_context, value.user_context2)
    }
}

impl From<FileContext> for FullContext {
    fn from(value: FileContext) -> Self {
        FullContext {
            user_context: value.node.0,
            user_context2: value.descriptor.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marshal_round_trip() {
        for (node, desc) in [(0, 0), (1, 2), (u64::MAX, 7), (0xdead_beef, u64::MAX)] {
            let ctx = FileContext::new(node, desc);
            let full = FullContext::from(ctx);
            assert_eq!(node, full.user_context);
            assert_eq!(desc, full.user_context2);
            assert_eq!(ctx, FileContext::from(full));
        }
    }

    #[test]
    fn null_context() {
        assert!(FileContext::default().is_null());
        assert!(!FileContext::new(0, 1).is_null());
        assert!(!FileContext::new(1, 0).is_null());
    }
}
