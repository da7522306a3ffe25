type TtlInnerType = u8;

/// IPv4 time-to-live. Routers decrement it per hop; its expiry triggers the
/// Time Exceeded replies the traceroute sweep listens for.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Ttl(pub TtlInnerType);

impl From<TtlInnerType> for Ttl {
    fn from(integer: TtlInnerType) -> Self {
        Ttl(integer)
    }
}

impl From<Ttl> for TtlInnerType {
    fn from(ttl: Ttl) -> Self {
        ttl.0
    }
}

impl std::fmt::Display for Ttl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
