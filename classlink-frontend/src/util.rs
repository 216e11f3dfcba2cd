use classlink_base::id::is_array_class;

/// Turn a class name given on the command line into a descriptor.
/// `pkg.Name` and `pkg/Name` become `Lpkg/Name;`, while descriptors are kept as they are.
pub(crate) fn class_descriptor(name: &str) -> String {
    let is_descriptor = is_array_class(name)
        || (name.starts_with('L') && name.ends_with(';'))
        || (name.len() == 1 && "ZBCSIJFDV".contains(name));
    if is_descriptor {
        name.to_owned()
    } else {
        format!("L{};", name.replace('.', "/"))
    }
}
