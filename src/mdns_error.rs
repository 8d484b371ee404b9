use std::{ error::Error, fmt::Display, io };

pub type Result<T> = std::result::Result<T, MdnsError>;

#[derive(Debug)]
pub enum MdnsError
{
    BadParameter(String),
    NotFound(String),
    DuplicateItem(String),
    OutOfOrder(String),
    Internal(String),
    NoUsableInterface,
    Io(String, io::Error),
    Compound(Vec<MdnsError>),
    InvalidHeader,
    LabelTooLong,
    LabelCompressionLoop,
    LabelPtrForward,
    LabelInvalid,
    InvalidRecord,
    InvalidOpcode(u8),
    InvalidRcode(u8),
    Truncated
}

impl MdnsError
{
    /// Wraps an I/O error with the name of the operation that produced it.
    pub fn io(op: &str, err: io::Error) -> MdnsError
    {
        MdnsError::Io(op.to_string(), err)
    }

    /// Collapses a list of per-destination errors into a single result.
    pub fn compound(mut errors: Vec<MdnsError>) -> Result<()>
    {
        match errors.len()
        {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(MdnsError::Compound(errors))
        }
    }

    pub fn is_duplicate(&self) -> bool
    {
        matches!(self, MdnsError::DuplicateItem(_))
    }

    pub fn is_bad_parameter(&self) -> bool
    {
        matches!(self, MdnsError::BadParameter(_))
    }
}

impl Error for MdnsError
{
    fn source(&self) -> Option<&(dyn Error + 'static)>
    {
        match self
        {
            MdnsError::Io(_, err) => Some(err),
            _ => None
        }
    }
}

impl From<io::Error> for MdnsError
{
    fn from(err: io::Error) -> Self
    {
        MdnsError::Io(String::from("socket"), err)
    }
}

impl<T> From<std::sync::PoisonError<T>> for MdnsError
{
    fn from(err: std::sync::PoisonError<T>) -> Self
    {
        MdnsError::Internal(format!("lock poisoned: {}", err))
    }
}

impl Display for MdnsError
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        match self
        {
            MdnsError::BadParameter(context) =>
            {
                write!(f, "mDNS error: Bad parameter: {}", context)
            },
            MdnsError::NotFound(context) =>
            {
                write!(f, "mDNS error: Not found: {}", context)
            },
            MdnsError::DuplicateItem(context) =>
            {
                write!(f, "mDNS error: Duplicate item: {}", context)
            },
            MdnsError::OutOfOrder(context) =>
            {
                write!(f, "mDNS error: Out of order: {}", context)
            },
            MdnsError::Internal(context) =>
            {
                write!(f, "mDNS error: Internal error: {}", context)
            },
            MdnsError::NoUsableInterface =>
            {
                write!(f, "mDNS error: No usable interface")
            },
            MdnsError::Io(context, err) =>
            {
                write!(f, "mDNS error: {}: {}", context, err)
            },
            MdnsError::Compound(errors) =>
            {
                let messages: Vec<String> = errors.iter().map(|err| err.to_string()).collect();
                write!(f, "{}", messages.join("; "))
            },
            MdnsError::InvalidHeader =>
            {
                write!(f, "mDNS error: Invalid DNS header")
            },
            MdnsError::LabelTooLong =>
            {
                write!(f, "mDNS error: Label too long")
            },
            MdnsError::LabelCompressionLoop =>
            {
                write!(f, "mDNS error: Label compression loop")
            },
            MdnsError::LabelPtrForward =>
            {
                write!(f, "mDNS error: Label pointer pointing forward")
            },
            MdnsError::LabelInvalid =>
            {
                write!(f, "mDNS error: Label invalid")
            },
            MdnsError::InvalidRecord =>
            {
                write!(f, "mDNS error: Invalid resource record")
            },
            MdnsError::InvalidOpcode(opcode) =>
            {
                write!(f, "mDNS error: Unexpected opcode {}", opcode)
            },
            MdnsError::InvalidRcode(rcode) =>
            {
                write!(f, "mDNS error: Unexpected rcode {}", rcode)
            },
            MdnsError::Truncated =>
            {
                write!(f, "mDNS error: Truncated message")
            }
        }
    }
}
