use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_until,
    character::complete::{char, one_of},
    combinator::{eof, map},
    multi::many0,
    sequence::delimited,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDescriptor(pub FieldType);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldType>,
    pub return_type: ReturnType,
}

pub type ReturnType = Option<FieldType>;

#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Object(String),
    Short,
    Boolean,
    Array(Box<FieldType>),
}

impl FieldType {
    /// Category-two values (`long`, `double`) take two slots.
    pub fn is_category_two(&self) -> bool {
        matches!(self, FieldType::Long | FieldType::Double)
    }

    pub fn slot_size(&self) -> usize {
        if self.is_category_two() { 2 } else { 1 }
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    /// Width in bytes of one array element of this type.
    pub fn element_size(&self) -> usize {
        match self {
            FieldType::Byte | FieldType::Boolean => 1,
            FieldType::Char | FieldType::Short => 2,
            FieldType::Int | FieldType::Float => 4,
            FieldType::Long | FieldType::Double => 8,
            FieldType::Object(_) | FieldType::Array(_) => 4,
        }
    }

    pub fn to_descriptor(&self) -> String {
        match self {
            FieldType::Byte => "B".to_string(),
            FieldType::Char => "C".to_string(),
            FieldType::Double => "D".to_string(),
            FieldType::Float => "F".to_string(),
            FieldType::Int => "I".to_string(),
            FieldType::Long => "J".to_string(),
            FieldType::Short => "S".to_string(),
            FieldType::Boolean => "Z".to_string(),
            FieldType::Object(class_name) => format!("L{class_name};"),
            FieldType::Array(element) => format!("[{}", element.to_descriptor()),
        }
    }
}

impl MethodDescriptor {
    /// Slots taken by the arguments, not counting `this`.
    pub fn argument_slots(&self) -> usize {
        self.parameters.iter().map(FieldType::slot_size).sum()
    }
}

pub fn parse_field_descriptor(input: &str) -> IResult<&str, FieldDescriptor> {
    let (input, field_type) = parse_field_type(input)?;
    eof(input)?;
    Ok((input, FieldDescriptor(field_type)))
}

pub fn parse_method_descriptor(input: &str) -> IResult<&str, MethodDescriptor> {
    let (input, parameters) =
        delimited(char('('), many0(parse_field_type), char(')')).parse(input)?;

    let (input, return_type) = parse_return_type_descriptor(input)?;

    eof(input)?;
    Ok((
        input,
        MethodDescriptor {
            parameters,
            return_type,
        },
    ))
}

pub fn parse_return_type_descriptor(input: &str) -> IResult<&str, ReturnType> {
    alt((map(parse_field_type, Some), parse_void_type)).parse(input)
}

fn parse_field_type(input: &str) -> IResult<&str, FieldType> {
    alt((parse_base_type, parse_object_type, parse_array_type)).parse(input)
}

fn parse_base_type(input: &str) -> IResult<&str, FieldType> {
    let (input, ch) = one_of("BCDFIJSZ")(input)?;
    let field_type = match ch {
        'B' => FieldType::Byte,
        'C' => FieldType::Char,
        'D' => FieldType::Double,
        'F' => FieldType::Float,
        'I' => FieldType::Int,
        'J' => FieldType::Long,
        'S' => FieldType::Short,
        _ => FieldType::Boolean,
    };
    Ok((input, field_type))
}

fn parse_object_type(input: &str) -> IResult<&str, FieldType> {
    let (input, _) = char('L')(input)?;

    let (input, class_name) = take_until(";")(input)?;

    let (input, _) = char(';')(input)?;

    Ok((input, FieldType::Object(class_name.to_string())))
}

fn parse_array_type(input: &str) -> IResult<&str, FieldType> {
    let (input, _) = char('[')(input)?;

    let (input, field_type) = parse_field_type(input)?;

    Ok((input, FieldType::Array(Box::new(field_type))))
}

fn parse_void_type(input: &str) -> IResult<&str, Option<FieldType>> {
    let (input, _) = char('V')(input)?;
    Ok((input, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_descriptor() {
        let (_, FieldDescriptor(ty)) = parse_field_descriptor("[Ljava/lang/String;").unwrap();
        assert_eq!(
            ty,
            FieldType::Array(Box::new(FieldType::Object("java/lang/String".to_string())))
        );
        assert_eq!(ty.to_descriptor(), "[Ljava/lang/String;");
        assert!(parse_field_descriptor("Ix").is_err());
        assert!(parse_field_descriptor("V").is_err());
    }

    #[test]
    fn test_method_descriptor_slots() {
        let (_, descriptor) = parse_method_descriptor("(IJLjava/lang/Object;D[J)V").unwrap();
        assert_eq!(descriptor.parameters.len(), 5);
        assert_eq!(descriptor.argument_slots(), 7);
        assert_eq!(descriptor.return_type, None);

        let (_, descriptor) = parse_method_descriptor("()J").unwrap();
        assert_eq!(descriptor.return_type, Some(FieldType::Long));
        assert!(descriptor.return_type.unwrap().is_category_two());
    }
}
