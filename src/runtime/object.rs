use std::{
    any::Any,
    fmt::{self, Debug},
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use parking_lot::Mutex;

use crate::{
    descriptor::FieldType,
    runtime::{Class, Exception, Field, ObjectRef, Slot, VmResult},
};

/// A value as the interpreter sees it. Sub-int primitives travel as `Int`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Reference(ObjectRef),
}

impl Value {
    /// Zero value of a field or array element of `field_type`.
    pub fn zero(field_type: &FieldType) -> Value {
        match field_type {
            FieldType::Long => Value::Long(0),
            FieldType::Float => Value::Float(0.0),
            FieldType::Double => Value::Double(0.0),
            FieldType::Object(_) | FieldType::Array(_) => Value::Reference(0),
            _ => Value::Int(0),
        }
    }

    pub fn slot_size(&self) -> usize {
        match self {
            Value::Long(_) | Value::Double(_) => 2,
            _ => 1,
        }
    }

    /// Whether this value may be stored in a field or element of
    /// `field_type`.
    pub fn fits(&self, field_type: &FieldType) -> bool {
        match self {
            Value::Int(_) => matches!(
                field_type,
                FieldType::Byte
                    | FieldType::Char
                    | FieldType::Short
                    | FieldType::Int
                    | FieldType::Boolean
            ),
            Value::Long(_) => *field_type == FieldType::Long,
            Value::Float(_) => *field_type == FieldType::Float,
            Value::Double(_) => *field_type == FieldType::Double,
            Value::Reference(_) => matches!(field_type, FieldType::Object(_) | FieldType::Array(_)),
        }
    }

    /// Appends the slot encoding: high word first for category-two values.
    pub fn push_slots(self, out: &mut Vec<Slot>) {
        match self {
            Value::Int(v) => out.push(v as u32),
            Value::Float(v) => out.push(v.to_bits()),
            Value::Reference(v) => out.push(v),
            Value::Long(v) => out.extend(split_wide(v as u64)),
            Value::Double(v) => out.extend(split_wide(v.to_bits())),
        }
    }

    /// Decodes a value of `field_type` from the front of `slots`.
    pub fn from_slots(field_type: &FieldType, slots: &[Slot]) -> VmResult<Value> {
        let word = |i: usize| {
            slots.get(i).copied().ok_or_else(|| {
                Exception::Internal(format!("{} slots hold no {field_type:?}", slots.len()))
            })
        };
        Ok(match field_type {
            FieldType::Long => Value::Long(join_wide(word(0)?, word(1)?) as i64),
            FieldType::Double => Value::Double(f64::from_bits(join_wide(word(0)?, word(1)?))),
            FieldType::Float => Value::Float(f32::from_bits(word(0)?)),
            FieldType::Object(_) | FieldType::Array(_) => Value::Reference(word(0)?),
            _ => Value::Int(word(0)? as i32),
        })
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            Value::Reference(v) => Some(*v),
            _ => None,
        }
    }
}

pub(crate) fn split_wide(value: u64) -> [Slot; 2] {
    [(value >> 32) as Slot, value as Slot]
}

pub(crate) fn join_wide(high: Slot, low: Slot) -> u64 {
    (u64::from(high) << 32) | u64::from(low)
}

/// Type-dependent payload of an object.
#[derive(Debug, Clone)]
pub enum ObjectAux {
    None,
    /// A `java/lang/Class` instance standing for this class.
    ClassMirror(Arc<Class>),
    /// Modified UTF-8 content of an interned string.
    InternedString(Arc<[u8]>),
    Array { element_size: usize, length: usize },
}

/// Longest array the guest can ask for; lengths are `int`s.
const MAX_ARRAY_LENGTH: usize = i32::MAX as usize;

/// A guest object: its class, payload and a flat run of slots.
///
/// Instance field ids index straight into `slots`; the numbering is shared
/// with every superclass, so an upcast never moves a field.
pub struct Object {
    class: Arc<Class>,
    aux: ObjectAux,
    /// Side data owned by natives, e.g. a captured stack trace.
    extra: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
    slots: Box<[AtomicU32]>,
}

impl Object {
    /// A zeroed instance with one slot per instance field id of `class`.
    pub fn new(class: Arc<Class>) -> Object {
        let slots = (0..class.inst_fields_count()).map(|_| AtomicU32::new(0)).collect();
        Object {
            class,
            aux: ObjectAux::None,
            extra: Mutex::new(None),
            slots,
        }
    }

    pub fn with_aux(class: Arc<Class>, aux: ObjectAux) -> Object {
        Object {
            aux,
            ..Object::new(class)
        }
    }

    /// A zeroed array of `length` elements. The element type comes from the
    /// array class; category-two elements take two slots each.
    pub fn new_array(class: Arc<Class>, length: usize) -> VmResult<Object> {
        let component = class.component_type().cloned().ok_or_else(|| {
            Exception::Internal(format!("{} is not an array class", class.name()))
        })?;
        let too_large = || {
            Exception::OutOfMemory(format!(
                "requested array size {length} of {} exceeds VM limit",
                class.name()
            ))
        };
        if length > MAX_ARRAY_LENGTH {
            return Err(too_large());
        }
        let slot_count = length
            .checked_mul(component.slot_size())
            .ok_or_else(too_large)?;
        let slots = zeroed(slot_count).ok_or_else(too_large)?;
        Ok(Object {
            aux: ObjectAux::Array {
                element_size: component.element_size(),
                length,
            },
            extra: Mutex::new(None),
            slots,
            class,
        })
    }

    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    pub fn aux(&self) -> &ObjectAux {
        &self.aux
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        match self.aux {
            ObjectAux::Array {
                element_size,
                length,
            } => element_size * length,
            _ => self.slots.len() * size_of::<Slot>(),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn get_slot(&self, id: usize) -> VmResult<Slot> {
        Ok(self.slot(id)?.load(Ordering::Acquire))
    }

    pub fn set_slot(&self, id: usize, value: Slot) -> VmResult<()> {
        self.slot(id)?.store(value, Ordering::Release);
        Ok(())
    }

    /// A 64-bit value stored at `id` (high word) and `id + 1` (low word).
    pub fn get_wide(&self, id: usize) -> VmResult<u64> {
        Ok(join_wide(self.get_slot(id)?, self.get_slot(id + 1)?))
    }

    pub fn set_wide(&self, id: usize, value: u64) -> VmResult<()> {
        // bounds first so a failed store leaves both halves alone
        self.slot(id + 1)?;
        let [high, low] = split_wide(value);
        self.set_slot(id, high)?;
        self.set_slot(id + 1, low)
    }

    pub fn get_field(&self, field: &Field) -> VmResult<Value> {
        self.check_instance_field(field)?;
        self.read(field.id(), field.field_type())
    }

    pub fn set_field(&self, field: &Field, value: Value) -> VmResult<()> {
        self.check_instance_field(field)?;
        self.write(field.id(), field.field_type(), value)
    }

    /// Reads the instance field `name` of type `descriptor`, declared by this
    /// object's class or inherited.
    pub fn get_field_by_name(&self, name: &str, descriptor: &str) -> VmResult<Value> {
        let field = self.class.lookup_inst_field(name, descriptor)?;
        self.get_field(&field)
    }

    pub fn set_field_by_name(&self, name: &str, descriptor: &str, value: Value) -> VmResult<()> {
        let field = self.class.lookup_inst_field(name, descriptor)?;
        self.set_field(&field, value)
    }

    /// `instanceof`: the object's class is `class`, a subclass of it or an
    /// implementation of it.
    pub fn is_instance_of(&self, class: &Class) -> bool {
        self.class.is_subclass_of(class)
    }

    pub fn array_length(&self) -> VmResult<usize> {
        match self.aux {
            ObjectAux::Array { length, .. } => Ok(length),
            _ => Err(self.not_an_array()),
        }
    }

    pub fn get_element(&self, index: usize) -> VmResult<Value> {
        let component = self.element_type(index)?;
        self.read(index * component.slot_size(), component)
    }

    pub fn set_element(&self, index: usize, value: Value) -> VmResult<()> {
        let component = self.element_type(index)?;
        self.write(index * component.slot_size(), component, value)
    }

    pub fn extra(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.extra.lock().clone()
    }

    pub fn set_extra(&self, extra: Arc<dyn Any + Send + Sync>) {
        *self.extra.lock() = Some(extra);
    }

    fn element_type(&self, index: usize) -> VmResult<&FieldType> {
        let length = self.array_length()?;
        if index >= length {
            return Err(Exception::ArrayIndexOutOfBounds { index, length });
        }
        self.class
            .component_type()
            .ok_or_else(|| self.not_an_array())
    }

    fn read(&self, id: usize, field_type: &FieldType) -> VmResult<Value> {
        if field_type.is_category_two() {
            let [high, low] = split_wide(self.get_wide(id)?);
            Value::from_slots(field_type, &[high, low])
        } else {
            Value::from_slots(field_type, &[self.get_slot(id)?])
        }
    }

    /// Stores `value` at `id` after checking it against the declared type, so
    /// a mistyped value never spills into a neighbouring slot.
    fn write(&self, id: usize, field_type: &FieldType, value: Value) -> VmResult<()> {
        if !value.fits(field_type) {
            return Err(Exception::Internal(format!(
                "{value:?} is not a {}",
                field_type.to_descriptor()
            )));
        }
        match value {
            Value::Long(v) => self.set_wide(id, v as u64),
            Value::Double(v) => self.set_wide(id, v.to_bits()),
            Value::Int(v) => self.set_slot(id, v as u32),
            Value::Float(v) => self.set_slot(id, v.to_bits()),
            Value::Reference(v) => self.set_slot(id, v),
        }
    }

    fn check_instance_field(&self, field: &Field) -> VmResult<()> {
        if field.is_static() {
            return Err(Exception::IncompatibleClassChange(format!(
                "expected non-static field {field}"
            )));
        }
        Ok(())
    }

    fn slot(&self, id: usize) -> VmResult<&AtomicU32> {
        self.slots.get(id).ok_or_else(|| {
            Exception::Internal(format!(
                "slot {id} out of range for {} ({} slots)",
                self.class.name(),
                self.slots.len()
            ))
        })
    }

    fn not_an_array(&self) -> Exception {
        Exception::Internal(format!("{} is not an array", self.class.name()))
    }
}

/// A shallow copy: same class and payload, slots copied, side data shared.
impl Clone for Object {
    fn clone(&self) -> Self {
        Object {
            class: Arc::clone(&self.class),
            aux: self.aux.clone(),
            extra: Mutex::new(self.extra()),
            slots: self
                .slots
                .iter()
                .map(|slot| AtomicU32::new(slot.load(Ordering::Acquire)))
                .collect(),
        }
    }
}

impl Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", self.class.name())
            .field("aux", &self.aux)
            .field("slots", &self.slots.len())
            .finish_non_exhaustive()
    }
}

/// `count` zeroed slots, or `None` when the allocation cannot be made.
fn zeroed(count: usize) -> Option<Box<[AtomicU32]>> {
    let mut slots = Vec::new();
    slots.try_reserve_exact(count).ok()?;
    slots.extend((0..count).map(|_| AtomicU32::new(0)));
    Some(slots.into_boxed_slice())
}
