/// Opaque identifier attached to a registration, returned verbatim by the
/// Poller alongside each active event. The Reactor uses it as a
/// `(slot, generation)`-packed index into its Channel arena rather than a
/// raw fd, so a stale event for a since-reused slot can be detected and
/// dropped instead of dispatched.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub usize);

impl From<usize> for Token {
    #[inline]
    fn from(val: usize) -> Token {
        Token(val)
    }
}

impl From<Token> for usize {
    #[inline]
    fn from(val: Token) -> usize {
        val.0
    }
}
