pub use nix::errno::Errno::{self, *};
use nix::Error as NixError;
use std::io::Error as IOError;
use std::path::StripPrefixError;
use std::{
    fmt::{self, Display},
    result,
};

pub type Result<T> = result::Result<T, Error>;

/// Crate-wide error type. Besides an optional message and source, it carries
/// an `errno` value, since most failures end up surfaced to a tracee as the
/// (negated) result of its system call.
pub struct Error {
    errno: Errno,
    msg: Option<Box<dyn Display + Send + Sync + 'static>>,
    source: Option<Box<dyn std::error::Error>>,
}

#[allow(dead_code)]
impl Error {
    /// Create an Error with an unknown errno.
    pub fn unknown() -> Self {
        Error::errno(Errno::UnknownErrno)
    }

    /// Create an Error with the specified errno.
    pub fn errno(errno: Errno) -> Self {
        Error {
            errno,
            msg: None,
            source: None,
        }
    }

    /// Create an Error with the specified message.
    pub fn msg<M>(msg: M) -> Self
    where
        M: Display + Send + Sync + 'static,
    {
        Error::errno_with_msg(Errno::UnknownErrno, msg)
    }

    /// Create an Error with the specified errno and message.
    pub fn errno_with_msg<M>(errno: Errno, msg: M) -> Self
    where
        M: Display + Send + Sync + 'static,
    {
        Error {
            errno,
            msg: Some(Box::new(msg)),
            source: None,
        }
    }

    pub fn with_errno(mut self, errno: Errno) -> Self {
        self.errno = errno;
        self
    }

    pub fn with_msg<M>(mut self, msg: M) -> Self
    where
        M: Display + Send + Sync + 'static,
    {
        self.msg = Some(Box::new(msg));
        self
    }

    /// Errno of this Error; `UnknownErrno` when none was set.
    pub fn get_errno(&self) -> Errno {
        self.errno
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error with {}({})", self.errno, self.errno as i32)?;

        if let Some(msg) = &self.msg {
            write!(f, ", msg: {}", msg)?;
        }
        if let Some(source) = &self.source {
            write!(f, ", source: {}", source)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Error");
        d.field("errno", &self.errno);
        match self.msg.as_ref() {
            Some(msg) => d.field("msg", &Some(format_args!("{}", msg))),
            None => d.field("msg", &Option::<()>::None),
        };
        d.field("source", &self.source).finish()
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.errno == other.errno
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Error {
        Error::errno(errno)
    }
}

impl From<IOError> for Error {
    fn from(error: IOError) -> Error {
        Error {
            errno: match error.raw_os_error() {
                Some(errno) => Errno::from_i32(errno),
                None => Errno::UnknownErrno,
            },
            msg: None,
            source: Some(Box::new(error)),
        }
    }
}

impl From<NixError> for Error {
    fn from(error: NixError) -> Error {
        Error {
            errno: match error {
                NixError::Sys(errno) => errno,
                _ => Errno::UnknownErrno,
            },
            msg: None,
            source: Some(Box::new(error)),
        }
    }
}

impl From<StripPrefixError> for Error {
    fn from(error: StripPrefixError) -> Error {
        Error {
            errno: Errno::UnknownErrno,
            msg: None,
            source: Some(Box::new(error)),
        }
    }
}

/// Extension trait to attach a message or override the errno of a
/// `Result<T, E>` while converting it to our `Result<T>`.
#[allow(dead_code)]
pub trait WithContext<T> {
    fn errno(self, errno: Errno) -> Result<T>;

    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> WithContext<T> for result::Result<T, E>
where
    Error: From<E>,
{
    fn errno(self, errno: Errno) -> Result<T> {
        self.map_err(|error| Into::<Error>::into(error).with_errno(errno))
    }

    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        self.map_err(|error| Into::<Error>::into(error).with_msg(context))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|error| Into::<Error>::into(error).with_msg(f()))
    }
}
