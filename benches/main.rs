use criterion::{black_box, criterion_group, criterion_main, Criterion};
use monty_core::{builtins, dispatch, new_vm, Config, MagicName, Vm};

fn fresh_vm() -> Vm {
    new_vm(Config::default()).unwrap()
}

fn int_add(c: &mut Criterion) {
    let mut vm = fresh_vm();
    let a = vm.new_int(1);
    let b = vm.new_int(2);
    c.bench_function("int_add", |bench| {
        bench.iter(|| {
            let sum = dispatch::binaryop(&mut vm, MagicName::__add__, black_box(a), black_box(b)).unwrap();
            black_box(sum);
        });
    });
}

fn dict_set_get(c: &mut Criterion) {
    let mut vm = fresh_vm();
    let dict = builtins::dict::new_dict(&mut vm).unwrap();
    let key = builtins::strtype::new_str(&mut vm, "key").unwrap();
    let value = builtins::strtype::new_str(&mut vm, "value").unwrap();
    c.bench_function("dict_set_get", |bench| {
        bench.iter(|| {
            builtins::dict::dict_set(&mut vm, dict, black_box(key), black_box(value)).unwrap();
            let got = builtins::dict::dict_get(&mut vm, dict, black_box(key)).unwrap();
            black_box(got);
        });
    });
}

fn list_append(c: &mut Criterion) {
    let mut vm = fresh_vm();
    let list = builtins::list::new_list(&mut vm, vec![]).unwrap();
    let value = vm.new_int(42);
    c.bench_function("list_append", |bench| {
        bench.iter(|| {
            builtins::list::list_emplace(&mut vm, list, black_box(value)).unwrap();
        });
    });
}

fn attribute_getattr(c: &mut Criterion) {
    let mut vm = fresh_vm();
    let object_ty = vm.types.builtins.object;
    let ty = vm.types.register(&mut vm.names, "Bench", Some(object_ty)).unwrap();
    let name = vm.names.intern("value").unwrap();
    let instance_id = vm.new_instance(ty).unwrap();
    vm.heap.get_mut(instance_id).attrs.as_mut().unwrap().insert(name, vm.new_int(7));
    let instance = monty_core::Cell::ptr(ty, instance_id);
    c.bench_function("attribute_getattr", |bench| {
        bench.iter(|| {
            let value = dispatch::getattr(&mut vm, black_box(instance), name).unwrap();
            black_box(value);
        });
    });
}

criterion_group!(benches, int_add, dict_set_get, list_append, attribute_getattr);
criterion_main!(benches);
