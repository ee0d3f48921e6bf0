mod common;

use std::{
    sync::{
        Arc, Barrier,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use jvm_core::{
    Exception, Value, VmOptions, VmResult,
    class::{Const, builder::ClassBuilder},
    runtime::{InitState, ObjectAux},
};

use common::{ScriptedExecutor, vm, vm_with_options};

#[test]
fn class_initializer_runs_once() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let executor = ScriptedExecutor::new().on("pkg/Counter~<clinit>~()V", move |vm, _, method| {
        counter.fetch_add(1, Ordering::SeqCst);
        let class = method.class()?;
        // re-entrant requests see the class as initializing
        vm.initialize_class(&class)?;
        assert_eq!(class.init_state(), InitState::Initializing);
        let count = class.lookup_static_field("count", "I")?;
        let current = vm.get_static(&count)?;
        vm.set_static(&count, Value::Int(current.as_int().unwrap_or(0) + 1))?;
        Ok(None)
    });
    let vm = vm(
        vec![(
            "pkg/Counter",
            ClassBuilder::new("pkg/Counter")
                .field(0x0009, "count", "I")
                .method(0x0008, "<clinit>", "()V", 2, 0, &[0xb1])
                .build(),
        )],
        executor,
    );
    let class = vm.load_class("pkg/Counter").unwrap();
    assert_eq!(class.init_state(), InitState::NotInitialized);

    for _ in 0..3 {
        vm.initialize_class(&class).unwrap();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(class.is_initialized());
    let count = class.lookup_static_field("count", "I").unwrap();
    assert_eq!(vm.get_static(&count).unwrap(), Value::Int(1));
}

#[test]
fn concurrent_initialization_runs_once() {
    const THREADS: usize = 8;
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let executor = ScriptedExecutor::new().on("pkg/Slow~<clinit>~()V", move |vm, _, method| {
        counter.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        let ready = method.class()?.lookup_static_field("ready", "Z")?;
        vm.set_static(&ready, Value::Int(1))?;
        Ok(None)
    });
    let vm = Arc::new(vm(
        vec![(
            "pkg/Slow",
            ClassBuilder::new("pkg/Slow")
                .field(0x0009, "ready", "Z")
                .method(0x0008, "<clinit>", "()V", 1, 0, &[0xb1])
                .build(),
        )],
        executor,
    ));

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            let (_, handle) = vm
                .spawn_thread(format!("init-{i}"), move |vm, _| -> VmResult<(InitState, Value)> {
                    let class = vm.load_class("pkg/Slow")?;
                    barrier.wait();
                    vm.initialize_class(&class)?;
                    let state = class.init_state();
                    let ready = class.lookup_static_field("ready", "Z")?;
                    Ok((state, vm.get_static(&ready)?))
                })
                .unwrap();
            handle
        })
        .collect();

    for handle in handles {
        let (state, ready) = handle.join().unwrap().unwrap();
        assert_eq!(state, InitState::Initialized);
        assert_eq!(ready, Value::Int(1));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn superclass_initializes_first() {
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let (parent_log, child_log) = (Arc::clone(&order), Arc::clone(&order));
    let executor = ScriptedExecutor::new()
        .on("pkg/Parent~<clinit>~()V", move |_, _, _| {
            parent_log.lock().push("parent");
            Ok(None)
        })
        .on("pkg/Child~<clinit>~()V", move |_, _, _| {
            child_log.lock().push("child");
            Ok(None)
        });
    let vm = vm(
        vec![
            (
                "pkg/Parent",
                ClassBuilder::new("pkg/Parent")
                    .method(0x0008, "<clinit>", "()V", 0, 0, &[0xb1])
                    .build(),
            ),
            (
                "pkg/Child",
                ClassBuilder::new("pkg/Child")
                    .super_class("pkg/Parent")
                    .method(0x0008, "<clinit>", "()V", 0, 0, &[0xb1])
                    .build(),
            ),
        ],
        executor,
    );
    let child = vm.load_class("pkg/Child").unwrap();
    vm.new_instance(&child).unwrap();
    assert_eq!(*order.lock(), vec!["parent", "child"]);
}

#[test]
fn failed_initializer_makes_class_unusable() {
    let executor = ScriptedExecutor::new().on("pkg/Broken~<clinit>~()V", |_, _, _| {
        Err(Exception::Internal("boom".into()))
    });
    let vm = vm(
        vec![(
            "pkg/Broken",
            ClassBuilder::new("pkg/Broken")
                .method(0x0008, "<clinit>", "()V", 0, 0, &[0xb1])
                .build(),
        )],
        executor,
    );
    let class = vm.load_class("pkg/Broken").unwrap();
    assert!(matches!(
        vm.initialize_class(&class),
        Err(Exception::Internal(msg)) if msg == "boom"
    ));
    assert_eq!(class.init_state(), InitState::Erroneous);
    assert!(matches!(
        vm.new_instance(&class),
        Err(Exception::NoClassDefFound(_))
    ));
}

#[test]
fn constant_values_seed_statics() {
    let vm = vm(
        vec![(
            "pkg/Consts",
            ClassBuilder::new("pkg/Consts")
                .constant_field(0x0019, "ANSWER", "I", Const::Int(42))
                .constant_field(0x0019, "BIG", "J", Const::Long(-1 << 40))
                .constant_field(0x0019, "HALF", "D", Const::Double(0.5))
                .constant_field(
                    0x0019,
                    "NAME",
                    "Ljava/lang/String;",
                    Const::String(jvm_core::Symbol::from_str("consts")),
                )
                .build(),
        )],
        ScriptedExecutor::new(),
    );
    let class = vm.load_class("pkg/Consts").unwrap();
    let get = |name: &str, desc: &str| {
        let field = class.lookup_static_field(name, desc).unwrap();
        vm.get_static(&field).unwrap()
    };
    assert_eq!(get("ANSWER", "I"), Value::Int(42));
    assert_eq!(get("BIG", "J"), Value::Long(-1 << 40));
    assert_eq!(get("HALF", "D"), Value::Double(0.5));
    let name = get("NAME", "Ljava/lang/String;").as_reference().unwrap();
    assert_eq!(vm.string_value(name).unwrap(), "consts");
    assert_eq!(name, vm.intern_str("consts").unwrap());
}

#[test]
fn strings_are_interned_with_char_values() {
    let vm = vm(vec![], ScriptedExecutor::new());
    let a = vm.intern_str("héllo").unwrap();
    let b = vm.intern_str("héllo").unwrap();
    assert_eq!(a, b);
    assert_ne!(a, vm.intern_str("hello").unwrap());

    let string = vm.object(a).unwrap();
    assert!(matches!(string.aux(), ObjectAux::InternedString(_)));
    let value_field = string.class().lookup_inst_field("value", "[C").unwrap();
    let chars = vm
        .get_field(a, &value_field)
        .unwrap()
        .as_reference()
        .unwrap();
    let chars = vm.object(chars).unwrap();
    assert_eq!(chars.array_length().unwrap(), 5);
    assert_eq!(chars.get_element(1).unwrap(), Value::Int('é' as i32));
}

#[test]
fn class_objects_are_unique() {
    let vm = vm(vec![], ScriptedExecutor::new());
    let object = vm.load_class("java/lang/Object").unwrap();
    let mirror = vm.class_object(&object).unwrap();
    assert_eq!(mirror, vm.class_object(&object).unwrap());
    match vm.object(mirror).unwrap().aux() {
        ObjectAux::ClassMirror(class) => assert!(Arc::ptr_eq(class, &object)),
        other => panic!("unexpected aux {other:?}"),
    }
}

#[test]
fn arrays_hold_typed_elements() {
    let vm = vm(vec![], ScriptedExecutor::new());
    let longs = vm.new_array("[J", 3).unwrap();
    let array = vm.object(longs).unwrap();
    assert_eq!(array.slot_count(), 6);
    array.set_element(2, Value::Long(i64::MIN)).unwrap();
    assert_eq!(array.get_element(2).unwrap(), Value::Long(i64::MIN));
    assert_eq!(array.get_element(0).unwrap(), Value::Long(0));
    assert!(matches!(
        array.get_element(3),
        Err(Exception::ArrayIndexOutOfBounds { index: 3, length: 3 })
    ));

    let strings = vm.new_array("[[Ljava/lang/String;", 2).unwrap();
    let class = Arc::clone(vm.object(strings).unwrap().class());
    assert!(class.is_array());
    assert_eq!(class.super_class().unwrap().name(), "java/lang/Object");
    assert!(matches!(vm.object(0), Err(Exception::NullPointer)));
}

#[test]
fn interfaces_cannot_be_instantiated() {
    let vm = vm(vec![], ScriptedExecutor::new());
    let cloneable = vm.load_class("java/lang/Cloneable").unwrap();
    assert!(matches!(
        vm.new_instance(&cloneable),
        Err(Exception::Instantiation(_))
    ));
}

#[test]
fn fill_in_stack_trace_skips_exception_frames() {
    let executor = ScriptedExecutor::new()
        .on("pkg/Main~run~()V", |vm, thread, _| {
            thread.stack().set_pc(3)?;
            let error = vm.load_class("pkg/MyError")?;
            let thrown = vm.construct(&error, "()V", &[])?;
            Err(Exception::Thrown(thrown))
        })
        .on("pkg/MyError~<init>~()V", |vm, thread, _| {
            let this = thread.stack().local(0)?;
            let throwable = vm.load_class("java/lang/Throwable")?;
            let init = throwable.get_constructor("()V").unwrap();
            vm.invoke(&init, &[Value::Reference(this)])
        })
        .on("java/lang/Throwable~<init>~()V", |vm, thread, method| {
            let this = thread.stack().local(0)?;
            let fill = method
                .class()?
                .lookup_inst_method("fillInStackTrace", "()Ljava/lang/Throwable;")?;
            vm.invoke_virtual(&fill, this, &[])?;
            Ok(None)
        })
        .on(
            "java/lang/Throwable~fillInStackTrace~()Ljava/lang/Throwable;",
            |vm, thread, _| {
                let this = thread.stack().local(0)?;
                vm.fill_in_stack_trace(this)?;
                Ok(Some(Value::Reference(this)))
            },
        );
    let vm = vm(
        vec![
            (
                "pkg/Main",
                ClassBuilder::new("pkg/Main")
                    .method(0x0009, "run", "()V", 2, 0, &[0xbb, 0x00, 0x02, 0x59, 0xb1])
                    .line_numbers(&[(0, 7), (3, 8)])
                    .source_file("Main.java")
                    .build(),
            ),
            (
                "pkg/MyError",
                ClassBuilder::new("pkg/MyError")
                    .super_class("java/lang/Throwable")
                    .method(0x0001, "<init>", "()V", 1, 1, &[0xb1])
                    .build(),
            ),
        ],
        executor,
    );
    let main = vm.load_class("pkg/Main").unwrap();
    let run = main.get_declared_method("run", "()V").unwrap();

    let Err(Exception::Thrown(thrown)) = vm.invoke(&run, &[]) else {
        panic!("expected a guest exception");
    };
    let trace = vm.stack_trace(thrown).unwrap();
    assert_eq!(trace.len(), 1);
    assert_eq!(trace[0].class_name, "pkg/Main");
    assert_eq!(trace[0].method_name, "run");
    assert_eq!(trace[0].line, Some(8));
    assert_eq!(trace[0].to_string(), "pkg.Main.run(Main.java:8)");
    assert!(vm.current_thread().stack().is_empty());
}

#[test]
fn deep_recursion_overflows_the_frame_stack() {
    let executor = ScriptedExecutor::new().on("pkg/Loop~spin~()V", |vm, _, method| {
        vm.invoke(method, &[]).map(|_| None)
    });
    // room for ten frames of header + 8 locals + 8 operands
    let options = VmOptions {
        thread_stack_slots: 10 * 18,
        ..VmOptions::default()
    };
    let vm = Arc::new(vm_with_options(
        options,
        vec![(
            "pkg/Loop",
            ClassBuilder::new("pkg/Loop")
                .method(0x0009, "spin", "()V", 8, 8, &[0xb8, 0x00, 0x02, 0xb1])
                .build(),
        )],
        executor,
    ));
    let depth = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&depth);
    let (_, handle) = vm
        .spawn_thread("spinner", move |vm, thread| -> VmResult<Option<Value>> {
            let spin = vm
                .load_class("pkg/Loop")?
                .get_declared_method("spin", "()V")
                .unwrap();
            let result = vm.invoke(&spin, &[]);
            observed.store(thread.stack().depth(), Ordering::SeqCst);
            result
        })
        .unwrap();
    let result = handle.join().unwrap();
    assert!(matches!(
        result,
        Err(Exception::StackOverflow { requested: 18, capacity: 180 })
    ));
    assert_eq!(depth.load(Ordering::SeqCst), 0);
}

#[test]
fn spawned_threads_resolve_themselves() {
    let vm = Arc::new(vm(vec![], ScriptedExecutor::new()));
    let spawned: Vec<_> = (0..4)
        .map(|i| {
            vm.spawn_thread(format!("worker-{i}"), |vm, thread| {
                let current = vm.current_thread();
                assert!(Arc::ptr_eq(&current, &thread));
                thread.name().to_string()
            })
            .unwrap()
        })
        .collect();
    for (i, (thread, handle)) in spawned.into_iter().enumerate() {
        assert_eq!(thread.native_id(), Some(handle.thread().id()));
        assert_eq!(handle.join().unwrap(), format!("worker-{i}"));
    }
}

#[test]
fn mistyped_writes_are_rejected() {
    let vm = vm(
        vec![(
            "pkg/P",
            ClassBuilder::new("pkg/P")
                .field(0x0001, "x", "I")
                .field(0x0001, "y", "I")
                .field(0x0001, "w", "J")
                .build(),
        )],
        ScriptedExecutor::new(),
    );
    let class = vm.load_class("pkg/P").unwrap();
    let object = vm.new_instance(&class).unwrap();
    let x = class.lookup_inst_field("x", "I").unwrap();
    let y = class.lookup_inst_field("y", "I").unwrap();
    let w = class.lookup_inst_field("w", "J").unwrap();

    vm.set_field(object, &y, Value::Int(42)).unwrap();
    assert!(matches!(
        vm.set_field(object, &x, Value::Long(7)),
        Err(Exception::Internal(_))
    ));
    assert_eq!(vm.get_field(object, &x).unwrap(), Value::Int(0));
    assert_eq!(vm.get_field(object, &y).unwrap(), Value::Int(42));
    assert!(vm.set_field(object, &w, Value::Int(1)).is_err());
    assert!(vm.set_field(object, &x, Value::Reference(3)).is_err());
    assert!(vm.set_field(object, &x, Value::Float(1.0)).is_err());

    let ints = vm.new_array("[I", 2).unwrap();
    let array = vm.object(ints).unwrap();
    assert!(array.set_element(0, Value::Long(-1)).is_err());
    assert_eq!(array.get_element(1).unwrap(), Value::Int(0));
}

#[test]
fn oversized_arrays_fail_cleanly() {
    let vm = vm(vec![], ScriptedExecutor::new());
    let live = vm.heap().live_objects();
    assert!(matches!(
        vm.new_array("[J", usize::MAX),
        Err(Exception::OutOfMemory(_))
    ));
    assert!(matches!(
        vm.new_array("[I", i32::MAX as usize + 1),
        Err(Exception::OutOfMemory(_))
    ));
    assert_eq!(vm.heap().live_objects(), live);
}

#[test]
fn objects_clone_and_answer_instanceof() {
    let vm = vm(
        vec![
            (
                "pkg/Base",
                ClassBuilder::new("pkg/Base").field(0x0001, "x", "I").build(),
            ),
            (
                "pkg/Copyable",
                ClassBuilder::new("pkg/Copyable")
                    .super_class("pkg/Base")
                    .implements("java/lang/Cloneable")
                    .field(0x0001, "y", "J")
                    .build(),
            ),
        ],
        ScriptedExecutor::new(),
    );
    let base = vm.load_class("pkg/Base").unwrap();
    let copyable = vm.load_class("pkg/Copyable").unwrap();
    let cloneable = vm.load_class("java/lang/Cloneable").unwrap();
    let string = vm.load_class("java/lang/String").unwrap();

    let original = vm.new_instance(&copyable).unwrap();
    let object = vm.object(original).unwrap();
    object.set_field_by_name("x", "I", Value::Int(5)).unwrap();
    object.set_field_by_name("y", "J", Value::Long(-9)).unwrap();
    assert!(matches!(
        object.get_field_by_name("z", "I"),
        Err(Exception::NoSuchField(_))
    ));

    let copy = vm.clone_object(original).unwrap();
    assert_ne!(copy, original);
    let copied = vm.object(copy).unwrap();
    assert_eq!(copied.get_field_by_name("x", "I").unwrap(), Value::Int(5));
    assert_eq!(copied.get_field_by_name("y", "J").unwrap(), Value::Long(-9));
    copied.set_field_by_name("x", "I", Value::Int(6)).unwrap();
    assert_eq!(object.get_field_by_name("x", "I").unwrap(), Value::Int(5));

    assert!(copied.is_instance_of(&copyable));
    assert!(copied.is_instance_of(&base));
    assert!(copied.is_instance_of(&cloneable));
    assert!(!copied.is_instance_of(&string));

    let plain = vm.new_instance(&base).unwrap();
    assert!(!vm.object(plain).unwrap().is_instance_of(&copyable));
    assert!(matches!(
        vm.clone_object(plain),
        Err(Exception::CloneNotSupported(name)) if name == "pkg/Base"
    ));

    let ints = vm.new_array("[I", 2).unwrap();
    vm.object(ints).unwrap().set_element(1, Value::Int(3)).unwrap();
    let ints_copy = vm.object(vm.clone_object(ints).unwrap()).unwrap();
    assert_eq!(ints_copy.array_length().unwrap(), 2);
    assert_eq!(ints_copy.get_element(1).unwrap(), Value::Int(3));
    assert!(ints_copy.is_instance_of(&cloneable));

    let bases = vm.array_class_of(&base).unwrap();
    assert_eq!(bases.name(), "[Lpkg/Base;");
    assert_eq!(vm.array_class_of(&bases).unwrap().name(), "[[Lpkg/Base;");
    let int_arrays = vm.array_class_of(ints_copy.class()).unwrap();
    assert_eq!(int_arrays.name(), "[[I");
}
