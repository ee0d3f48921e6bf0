use thiserror::Error;

use crate::runtime::ObjectRef;

/// Every failure the linking core can raise.
///
/// Each variant except [`Exception::Thrown`] stands for a guest error class,
/// see [`Exception::java_class_name`]; the interpreter maps them to guest
/// exception objects.
#[derive(Debug, Clone, Error)]
pub enum Exception {
    #[error("java.lang.ClassFormatError: {0}")]
    ClassFormat(String),
    #[error("java.lang.NoClassDefFoundError: {0}")]
    NoClassDefFound(String),
    #[error("java.lang.ClassCircularityError: {0}")]
    ClassCircularity(String),
    #[error("java.lang.NoSuchFieldError: {0}")]
    NoSuchField(String),
    #[error("java.lang.NoSuchMethodError: {0}")]
    NoSuchMethod(String),
    #[error("java.lang.IllegalAccessError: {0}")]
    IllegalAccess(String),
    #[error("java.lang.IncompatibleClassChangeError: {0}")]
    IncompatibleClassChange(String),
    #[error("java.lang.AbstractMethodError: {0}")]
    AbstractMethod(String),
    #[error("java.lang.InstantiationError: {0}")]
    Instantiation(String),
    #[error("java.lang.NullPointerException")]
    NullPointer,
    #[error("java.lang.CloneNotSupportedException: {0}")]
    CloneNotSupported(String),
    #[error("java.lang.ArrayIndexOutOfBoundsException: index {index} out of bounds for length {length}")]
    ArrayIndexOutOfBounds { index: usize, length: usize },
    #[error("truncated class file: wanted {wanted} bytes, {remaining} remaining")]
    TruncatedInput { wanted: usize, remaining: usize },
    #[error("java.lang.StackOverflowError: frame of {requested} slots exceeds stack capacity {capacity}")]
    StackOverflow { requested: usize, capacity: usize },
    #[error("java.lang.OutOfMemoryError: {0}")]
    OutOfMemory(String),
    #[error("java.lang.InternalError: {0}")]
    Internal(String),
    /// A guest exception object propagating out of executed code.
    #[error("guest exception @{0}")]
    Thrown(ObjectRef),
}

impl Exception {
    /// Binary name of the guest class this error surfaces as.
    pub fn java_class_name(&self) -> &'static str {
        match self {
            // a truncated file is malformed input from the guest's point of view
            Exception::ClassFormat(_) | Exception::TruncatedInput { .. } => {
                "java/lang/ClassFormatError"
            }
            Exception::NoClassDefFound(_) => "java/lang/NoClassDefFoundError",
            Exception::ClassCircularity(_) => "java/lang/ClassCircularityError",
            Exception::NoSuchField(_) => "java/lang/NoSuchFieldError",
            Exception::NoSuchMethod(_) => "java/lang/NoSuchMethodError",
            Exception::IllegalAccess(_) => "java/lang/IllegalAccessError",
            Exception::IncompatibleClassChange(_) => "java/lang/IncompatibleClassChangeError",
            Exception::AbstractMethod(_) => "java/lang/AbstractMethodError",
            Exception::Instantiation(_) => "java/lang/InstantiationError",
            Exception::NullPointer => "java/lang/NullPointerException",
            Exception::CloneNotSupported(_) => "java/lang/CloneNotSupportedException",
            Exception::ArrayIndexOutOfBounds { .. } => {
                "java/lang/ArrayIndexOutOfBoundsException"
            }
            Exception::StackOverflow { .. } => "java/lang/StackOverflowError",
            Exception::OutOfMemory(_) => "java/lang/OutOfMemoryError",
            Exception::Internal(_) => "java/lang/InternalError",
            Exception::Thrown(_) => "java/lang/Throwable",
        }
    }

    /// `true` for linkage failures: the `LinkageError` subclasses.
    pub fn is_linkage_error(&self) -> bool {
        matches!(
            self,
            Exception::ClassFormat(_)
                | Exception::TruncatedInput { .. }
                | Exception::NoClassDefFound(_)
                | Exception::ClassCircularity(_)
                | Exception::NoSuchField(_)
                | Exception::NoSuchMethod(_)
                | Exception::IllegalAccess(_)
                | Exception::IncompatibleClassChange(_)
                | Exception::AbstractMethod(_)
                | Exception::Instantiation(_)
        )
    }
}

pub type VmResult<T> = Result<T, Exception>;

/// `class~name~descriptor`, the member signature carried by lookup errors.
pub(crate) fn member_signature(class_name: &str, name: &str, descriptor: &str) -> String {
    format!("{class_name}~{name}~{descriptor}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = Exception::NoSuchMethod(member_signature("pkg/Base", "missing", "()V"));
        assert_eq!(err.to_string(), "java.lang.NoSuchMethodError: pkg/Base~missing~()V");
        assert_eq!(err.java_class_name(), "java/lang/NoSuchMethodError");
        assert!(err.is_linkage_error());

        let err = Exception::StackOverflow {
            requested: 12,
            capacity: 8,
        };
        assert_eq!(err.java_class_name(), "java/lang/StackOverflowError");
        assert!(!err.is_linkage_error());
    }
}
