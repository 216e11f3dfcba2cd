use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use classlink_base::{
    descriptor::{self, validate_type_descriptor, DescriptorType, PrimitiveType},
    flags::ClassAccessFlags,
    id::{ClassId, ContainerId, LoaderId, MethodId, StringIndex, TypeIndex},
    Container, OBJECT_DESCRIPTOR,
};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::{
    bootstrap::{self, ClassRoot, ClassRoots},
    class::{ArrayElement, Class, ClassKind, ClassStatus, LoadedClass},
    gc::Gc,
    heap::{Heap, ObjectRef, Root, RootVisitor},
    init::{self, NoStaticInitializer, StaticInitializer},
    intern::InternTable,
    link, load,
    resolve::{self, ReferenceCache},
    table::ClassTable,
    validate, LinkError, LinkageError, LinkerConfig, MalformedError,
};

/// A container registered with the linker, along with its resolution cache
#[derive(Debug)]
pub struct RegisteredContainer {
    id: ContainerId,
    container: Container,
    cache: ReferenceCache,
    /// Which loader searches this container. `Some(None)` is the bootstrap loader.
    owner: OnceCell<Option<LoaderId>>,
}
impl RegisteredContainer {
    #[must_use]
    pub fn id(&self) -> ContainerId {
        self.id
    }

    #[must_use]
    pub fn container(&self) -> &Container {
        &self.container
    }

    #[must_use]
    pub fn cache(&self) -> &ReferenceCache {
        &self.cache
    }

    /// `None` if no loader searches the container yet
    #[must_use]
    pub fn owner(&self) -> Option<Option<LoaderId>> {
        self.owner.get().copied()
    }
}

/// A loader which searches a fixed list of containers, after first delegating to the bootstrap
/// loader
#[derive(Debug)]
pub struct PathClassLoader {
    id: LoaderId,
    containers: SmallVec<[ContainerId; 4]>,
    object: ObjectRef,
}
impl PathClassLoader {
    #[must_use]
    pub fn id(&self) -> LoaderId {
        self.id
    }

    #[must_use]
    pub fn containers(&self) -> &[ContainerId] {
        &self.containers
    }

    /// The heap object representing the loader
    #[must_use]
    pub fn object(&self) -> ObjectRef {
        self.object
    }
}

/// The collaborators the linker calls out to
pub struct Collaborators {
    pub heap: Arc<dyn Heap>,
    pub static_initializer: Arc<dyn StaticInitializer>,
}
impl Default for Collaborators {
    fn default() -> Self {
        Collaborators {
            heap: Arc::new(Gc::new()),
            static_initializer: Arc::new(NoStaticInitializer),
        }
    }
}

pub struct ClassLinker {
    pub(crate) conf: LinkerConfig,
    pub(crate) table: ClassTable,
    containers: RwLock<Vec<Arc<RegisteredContainer>>>,
    boot_class_path: RwLock<Vec<ContainerId>>,
    loaders: RwLock<Vec<Arc<PathClassLoader>>>,
    roots: OnceCell<ClassRoots>,
    pub(crate) array_interfaces: OnceCell<SmallVec<[ClassId; 2]>>,
    init_done: AtomicBool,
    interner: InternTable,
    pub(crate) heap: Arc<dyn Heap>,
    pub(crate) static_initializer: Arc<dyn StaticInitializer>,
}
impl ClassLinker {
    /// Create the linker and bootstrap the root classes from the boot class path
    pub fn create(
        boot_class_path: Vec<Container>,
        conf: LinkerConfig,
        collaborators: Collaborators,
    ) -> Result<ClassLinker, LinkError> {
        let linker = ClassLinker {
            conf,
            table: ClassTable::default(),
            containers: RwLock::new(Vec::new()),
            boot_class_path: RwLock::new(Vec::new()),
            loaders: RwLock::new(Vec::new()),
            roots: OnceCell::new(),
            array_interfaces: OnceCell::new(),
            init_done: AtomicBool::new(false),
            interner: InternTable::default(),
            heap: collaborators.heap,
            static_initializer: collaborators.static_initializer,
        };

        for container in boot_class_path {
            linker.append_to_boot_class_path(container)?;
        }

        if linker.conf.synthesize_missing_roots {
            let synthetic = bootstrap::synthetic_root_container()?;
            linker.append_to_boot_class_path(synthetic)?;
        }

        let roots = bootstrap::bootstrap(&linker)?;
        // Only ever set here
        let _ = linker.roots.set(roots);
        linker.init_done.store(true, Ordering::Release);
        tracing::info!("Bootstrapped {} classes", linker.table.len());

        Ok(linker)
    }

    #[must_use]
    pub fn conf(&self) -> &LinkerConfig {
        &self.conf
    }

    /// Whether bootstrap has finished and the general lookup path is usable
    #[must_use]
    pub fn init_done(&self) -> bool {
        self.init_done.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn heap(&self) -> &Arc<dyn Heap> {
        &self.heap
    }

    pub fn class(&self, id: ClassId) -> Result<Arc<Class>, LinkError> {
        self.table.get(id).ok_or(LinkError::BadClassId(id))
    }

    /// Every published class, in publication order
    #[must_use]
    pub fn classes(&self) -> Vec<Arc<Class>> {
        self.table.classes()
    }

    #[must_use]
    pub fn class_count(&self) -> usize {
        self.table.len()
    }

    /// Get the class for one of the well known roots.
    /// Panics if called before bootstrap has finished, which can't happen outside the crate
    /// since [`ClassLinker::create`] does not return until then.
    #[must_use]
    pub fn class_root(&self, root: ClassRoot) -> ClassId {
        self.roots
            .get()
            .map(|roots| roots.get(root))
            .expect("class roots are set during bootstrap")
    }

    pub(crate) fn try_class_root(&self, root: ClassRoot) -> Result<ClassId, LinkError> {
        if let Some(roots) = self.roots.get() {
            return Ok(roots.get(root));
        }

        // During bootstrap, the roots are found through the table as they are published
        self.table
            .lookup(root.descriptor(), None)
            .map(|class| class.id)
            .ok_or(LinkError::NotBootstrapped)
    }

    pub fn method_class(&self, method: MethodId) -> Result<Arc<Class>, LinkError> {
        let class = self.class(method.class_id())?;
        let (_, index) = method.decompose();
        if class.method(index).is_none() {
            return Err(LinkError::BadMethodId(method));
        }

        Ok(class)
    }

    /// Register a container so that it can be handed to a loader, without searching it
    pub fn register_container(&self, container: Container) -> ContainerId {
        let mut containers = self.containers.write();
        let id = ContainerId::new_unchecked(containers.len() as u32);
        tracing::debug!("Registering container {} as #{}", container.name(), id.get());
        let cache = ReferenceCache::new(&container);
        containers.push(Arc::new(RegisteredContainer {
            id,
            container,
            cache,
            owner: OnceCell::new(),
        }));

        id
    }

    /// Register the container and add it to the end of the bootstrap loader's search path
    pub fn append_to_boot_class_path(&self, container: Container) -> Result<ContainerId, LinkError> {
        let id = self.register_container(container);
        let registered = self.find_reference_cache(id)?;
        registered
            .owner
            .set(None)
            .map_err(|_| LinkError::ContainerAlreadyOwned(id))?;
        self.boot_class_path.write().push(id);

        Ok(id)
    }

    /// The container and its resolution cache
    pub fn find_reference_cache(&self, id: ContainerId) -> Result<Arc<RegisteredContainer>, LinkError> {
        self.containers
            .read()
            .get(id.index())
            .cloned()
            .ok_or(LinkError::BadContainerId(id))
    }

    #[must_use]
    pub fn boot_class_path(&self) -> Vec<ContainerId> {
        self.boot_class_path.read().clone()
    }

    /// Create a loader which searches the given registered containers, after the bootstrap
    /// loader. Each container can only belong to a single loader.
    pub fn create_class_loader(&self, containers: &[ContainerId]) -> Result<LoaderId, LinkError> {
        self.check_bootstrapped()?;

        let loader_class = self.class(self.class_root(ClassRoot::PathClassLoader))?;

        // Held for the whole operation so that two loaders can't claim the same container
        let mut loaders = self.loaders.write();
        let registered = containers
            .iter()
            .map(|id| self.find_reference_cache(*id))
            .collect::<Result<SmallVec<[_; 4]>, _>>()?;
        if let Some(owned) = registered.iter().find(|x| x.owner.get().is_some()) {
            return Err(LinkError::ContainerAlreadyOwned(owned.id));
        }

        let id = LoaderId::new_unchecked(loaders.len() as u32);
        for container in &registered {
            container
                .owner
                .set(Some(id))
                .map_err(|_| LinkError::ContainerAlreadyOwned(container.id))?;
        }

        let object = self.heap.alloc_object(&loader_class);
        loaders.push(Arc::new(PathClassLoader {
            id,
            containers: containers.iter().copied().collect(),
            object,
        }));
        tracing::info!("Created class loader #{} over {:?}", id.get(), containers);

        Ok(id)
    }

    pub fn class_loader(&self, id: LoaderId) -> Result<Arc<PathClassLoader>, LinkError> {
        self.loaders
            .read()
            .get(id.index())
            .cloned()
            .ok_or(LinkError::BadLoaderId(id))
    }

    fn check_bootstrapped(&self) -> Result<(), LinkError> {
        if self.init_done() {
            Ok(())
        } else {
            Err(LinkError::NotBootstrapped)
        }
    }

    /// Find the class for the descriptor as seen by `loader`, loading and linking it if needed.
    /// The bootstrap loader is searched first, and a class which previously failed to load or
    /// link returns the same error again.
    pub fn find_class(&self, descriptor: &str, loader: Option<LoaderId>) -> Result<ClassId, LinkError> {
        self.check_bootstrapped()?;
        self.find_linked_class(descriptor, loader)
    }

    /// [`ClassLinker::find_class`] with the bootstrap loader
    pub fn find_system_class(&self, descriptor: &str) -> Result<ClassId, LinkError> {
        self.find_class(descriptor, None)
    }

    /// Look for a published class without loading anything
    #[must_use]
    pub fn lookup_class(&self, descriptor: &str, loader: Option<LoaderId>) -> Option<ClassId> {
        // A class the loader already defined keeps shadowing the boot class path, even if a
        // boot container defining the same descriptor was appended after it was loaded
        loader
            .and_then(|_| self.table.lookup(descriptor, loader))
            .or_else(|| self.table.lookup(descriptor, None))
            .map(|class| class.id)
    }

    pub fn find_primitive_class(&self, descriptor: char) -> Result<ClassId, LinkError> {
        let mut buf = [0; 4];
        let text = descriptor.encode_utf8(&mut buf);
        match PrimitiveType::from_descriptor_char(text.as_bytes()[0]) {
            Some(_) if text.len() == 1 => self
                .table
                .lookup(text, None)
                .map(|class| class.id)
                .ok_or(LinkError::NotBootstrapped),
            _ => Err(LinkError::NotFound {
                descriptor: text.to_owned(),
                loader: None,
            }),
        }
    }

    pub(crate) fn find_linked_class(
        &self,
        descriptor: &str,
        loader: Option<LoaderId>,
    ) -> Result<ClassId, LinkError> {
        let class = self.lookup_or_load(descriptor, loader)?;
        self.ensure_linked(&class)?;
        Ok(class.id)
    }

    /// Find the published class for the descriptor as `loader` sees it, publishing it if it
    /// isn't yet. The class is not necessarily linked, and may be in the error state if it
    /// failed to load.
    pub(crate) fn lookup_or_load(
        &self,
        descriptor: &str,
        loader: Option<LoaderId>,
    ) -> Result<Arc<Class>, LinkError> {
        validate_type_descriptor(descriptor).map_err(|error| MalformedError::Descriptor {
            descriptor: descriptor.to_owned(),
            error,
        })?;

        if descriptor.len() == 1 {
            return self
                .table
                .lookup(descriptor, None)
                .ok_or_else(|| LinkError::NotFound {
                    descriptor: descriptor.to_owned(),
                    loader,
                });
        }

        if let Some(component) = descriptor::component_descriptor(descriptor) {
            return self.create_array_class(descriptor, component, loader);
        }

        // What the loader defined first, so its classes keep their identity when the boot class
        // path later grows a definition of the same descriptor
        if loader.is_some() {
            if let Some(class) = self.table.lookup(descriptor, loader) {
                return Ok(class);
            }
        }
        if let Some(class) = self.table.lookup(descriptor, None) {
            return Ok(class);
        }

        let (registered, def_index, defining) = self
            .locate_definition(descriptor, loader)?
            .ok_or_else(|| LinkError::NotFound {
                descriptor: descriptor.to_owned(),
                loader,
            })?;

        let container = registered.container();
        let def = container
            .class_def(def_index)
            .ok_or(LinkError::BadContainerId(registered.id))?;
        let candidate = match load::load_class(
            &self.conf,
            container,
            registered.id,
            def_index,
            def,
            defining,
        ) {
            Ok(candidate) => candidate,
            Err(err) => {
                tracing::warn!("Failed to load {}: {}", descriptor, err);
                LoadedClass::failed(descriptor, defining, registered.id, def_index, err)
            }
        };

        let (class, inserted) = self.table.insert_if_absent(candidate);
        if inserted {
            if self.conf.log_class_loading {
                tracing::info!("Loaded {} from {} as #{}", descriptor, container.name(), class.id.get());
            } else {
                tracing::trace!("Loaded {} from {} as #{}", descriptor, container.name(), class.id.get());
            }
        } else {
            tracing::debug!("Another thread published {} first", descriptor);
        }

        Ok(class)
    }

    /// Find which container defines the descriptor for `loader`, and which loader that makes
    /// the defining loader. The bootstrap path always takes priority.
    pub(crate) fn locate_definition(
        &self,
        descriptor: &str,
        loader: Option<LoaderId>,
    ) -> Result<Option<(Arc<RegisteredContainer>, usize, Option<LoaderId>)>, LinkError> {
        let boot = self.boot_class_path();
        if let Some((container, index)) = self.find_in_class_path(descriptor, &boot)? {
            return Ok(Some((container, index, None)));
        }

        if let Some(loader) = loader {
            let path = self.class_loader(loader)?;
            if let Some((container, index)) = self.find_in_class_path(descriptor, path.containers())? {
                return Ok(Some((container, index, Some(loader))));
            }
        }

        Ok(None)
    }

    fn find_in_class_path(
        &self,
        descriptor: &str,
        class_path: &[ContainerId],
    ) -> Result<Option<(Arc<RegisteredContainer>, usize)>, LinkError> {
        for id in class_path {
            let registered = self.find_reference_cache(*id)?;
            if let Some((index, _)) = registered.container.find_class_def(descriptor) {
                return Ok(Some((registered, index)));
            }
        }

        Ok(None)
    }

    /// Get or create the array class. Arrays are defined by the loader of their element type.
    pub(crate) fn create_array_class(
        &self,
        descriptor: &str,
        component_descriptor: &str,
        loader: Option<LoaderId>,
    ) -> Result<Arc<Class>, LinkError> {
        let component = self.lookup_or_load(component_descriptor, loader)?;
        if let Some(failure) = component.failure() {
            return Err(failure);
        }
        let defining = component.loader;

        if let Some(class) = self.table.lookup(descriptor, defining) {
            return Ok(class);
        }

        let element = match component.kind {
            ClassKind::Primitive(PrimitiveType::Void) => {
                return Err(LinkError::NotFound {
                    descriptor: descriptor.to_owned(),
                    loader,
                })
            }
            ClassKind::Primitive(prim) => ArrayElement::Primitive(prim),
            _ => ArrayElement::Reference,
        };

        let access_flags = component.access_flags.visibility_bits()
            | ClassAccessFlags::FINAL
            | ClassAccessFlags::ABSTRACT;
        let candidate = LoadedClass {
            descriptor: descriptor.into(),
            loader: defining,
            access_flags,
            kind: ClassKind::Array {
                component: component.id,
                element,
            },
            fields: Vec::new(),
            methods: Vec::new(),
            failure: None,
        };

        let (class, inserted) = self.table.insert_if_absent(candidate);
        if inserted {
            tracing::trace!("Created array class {} as #{}", descriptor, class.id.get());
        }

        Ok(class)
    }

    /// Make sure the class is linked, linking it on this thread if no other thread is, or
    /// waiting for the thread which is.
    pub(crate) fn ensure_linked(&self, class: &Arc<Class>) -> Result<(), LinkError> {
        let me = thread::current().id();
        let mut state = class.lock_state();
        loop {
            if state.status == ClassStatus::Error {
                return Err(state
                    .failure
                    .clone()
                    .unwrap_or_else(|| circular(class)));
            }

            if state.status.is_linked() {
                return Ok(());
            }

            match state.owner {
                None => {
                    state.owner = Some(me);
                    drop(state);
                    return link::link_class(self, class);
                }
                // The class depends on itself while linking
                Some(owner) if owner == me => return Err(circular(class)),
                Some(_) => class.wait_state(&mut state),
            }
        }
    }

    /// Initialize the class, running its static initializer at most once. Returns immediately
    /// if this thread is already initializing it.
    pub fn initialize_class(&self, id: ClassId) -> Result<(), LinkError> {
        let class = self.class(id)?;
        init::initialize_class(self, &class)
    }

    /// Resolve a type reference from a class's container, caching successful results
    pub fn resolve_class(&self, referring: ClassId, index: TypeIndex) -> Result<ClassId, LinkError> {
        let referring = self.class(referring)?;
        resolve::resolve_class(self, &referring, index)
    }

    /// Resolve a string reference from a class's container into an interned string
    pub fn resolve_string(&self, referring: ClassId, index: StringIndex) -> Result<ObjectRef, LinkError> {
        let referring = self.class(referring)?;
        resolve::resolve_string(self, &referring, index)
    }

    /// Get the canonical string object for the given modified utf8 contents
    pub fn intern_string(&self, contents: &[u8]) -> Result<ObjectRef, LinkError> {
        self.interner.intern(self, contents)
    }

    /// Number of distinct strings interned so far
    #[must_use]
    pub fn interned_string_count(&self) -> usize {
        self.interner.len()
    }

    /// Whether `descriptor` names the same class when resolved by the defining loaders of `a`
    /// and `b`
    pub fn same_descriptor_classes(
        &self,
        descriptor: &str,
        a: ClassId,
        b: ClassId,
    ) -> Result<bool, LinkError> {
        let a = self.class(a)?;
        let b = self.class(b)?;
        let descriptor = DescriptorType::from_text(descriptor).map_err(|error| {
            MalformedError::Descriptor {
                descriptor: descriptor.to_owned(),
                error,
            }
        })?;
        validate::has_same_descriptor_classes(self, &descriptor, a.loader, b.loader)
    }

    /// Find the virtual method with the given signature that instances of the class dispatch to
    pub fn find_virtual_method(
        &self,
        class: ClassId,
        name: &str,
        descriptor: &str,
    ) -> Result<Option<MethodId>, LinkError> {
        let class = self.class(class)?;
        self.ensure_linked(&class)?;
        for id in class.vtable().iter().rev() {
            let (declaring, index) = id.decompose();
            let declaring = self.class(declaring)?;
            let method = declaring.method(index).ok_or(LinkError::BadMethodId(*id))?;
            if method.name() == name && method.descriptor_text() == descriptor {
                return Ok(Some(*id));
            }
        }

        Ok(None)
    }

    /// The implementation a virtual call of `method` on an instance of `receiver` runs
    pub fn find_virtual_target(&self, receiver: ClassId, method: MethodId) -> Result<MethodId, LinkError> {
        let declaring = self.method_class(method)?;
        let (_, index) = method.decompose();
        let method_ref = declaring.method(index).ok_or(LinkError::BadMethodId(method))?;

        if declaring.is_interface() {
            return self.find_interface_target(receiver, method);
        }

        if method_ref.is_direct() {
            return Ok(method);
        }

        let receiver_class = self.class(receiver)?;
        self.ensure_linked(&receiver_class)?;
        if !self.is_subclass_of(receiver, declaring.id)? {
            return Err(LinkError::IncompatibleReceiver { receiver, method });
        }

        let slot = method_ref.method_index().ok_or(LinkError::BadMethodId(method))?;
        let target = *receiver_class
            .vtable()
            .get(usize::from(slot))
            .ok_or(LinkError::IncompatibleReceiver { receiver, method })?;

        self.check_not_abstract(target)?;
        Ok(target)
    }

    /// The implementation an interface call of `method` on an instance of `receiver` runs
    pub fn find_interface_target(&self, receiver: ClassId, method: MethodId) -> Result<MethodId, LinkError> {
        let interface = self.method_class(method)?;
        let (_, index) = method.decompose();
        let method_ref = interface.method(index).ok_or(LinkError::BadMethodId(method))?;
        let position = method_ref.method_index().ok_or(LinkError::BadMethodId(method))?;

        let receiver_class = self.class(receiver)?;
        self.ensure_linked(&receiver_class)?;
        let entry = receiver_class
            .iftable()
            .iter()
            .find(|entry| entry.interface == interface.id)
            .ok_or(LinkError::IncompatibleReceiver { receiver, method })?;
        let slot = *entry
            .slots
            .get(usize::from(position))
            .ok_or(LinkError::IncompatibleReceiver { receiver, method })?;
        let target = *receiver_class
            .vtable()
            .get(usize::from(slot))
            .ok_or(LinkError::BadMethodId(method))?;

        self.check_not_abstract(target)?;
        Ok(target)
    }

    fn check_not_abstract(&self, target: MethodId) -> Result<(), LinkError> {
        let (class, index) = target.decompose();
        let class = self.class(class)?;
        let method = class.method(index).ok_or(LinkError::BadMethodId(target))?;
        if method.is_abstract() {
            return Err(LinkError::AbstractMethod { method: target });
        }

        Ok(())
    }

    /// Whether `class` is `super_class` or inherits from it
    pub fn is_subclass_of(&self, class: ClassId, super_class: ClassId) -> Result<bool, LinkError> {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == super_class {
                return Ok(true);
            }
            current = self.class(id)?.super_class();
        }

        Ok(false)
    }

    /// Whether `class` implements `interface`, directly or through its super types
    pub fn implements(&self, class: ClassId, interface: ClassId) -> Result<bool, LinkError> {
        let class = self.class(class)?;
        Ok(class.iftable().iter().any(|entry| entry.interface == interface))
    }

    /// Whether a value of type `source` can be stored in a location of type `target`
    pub fn is_assignable_from(&self, target: ClassId, source: ClassId) -> Result<bool, LinkError> {
        if target == source {
            return Ok(true);
        }

        let target_class = self.class(target)?;
        let source_class = self.class(source)?;
        if target_class.is_primitive() || source_class.is_primitive() {
            return Ok(false);
        }

        if target_class.descriptor() == OBJECT_DESCRIPTOR && target_class.loader.is_none() {
            return Ok(true);
        }

        if target_class.is_interface() {
            return self.implements(source, target);
        }

        match (target_class.component(), source_class.component()) {
            (Some(target_component), Some(source_component)) => {
                self.is_assignable_from(target_component, source_component)
            }
            (Some(_), None) => Ok(false),
            (None, _) => self.is_subclass_of(source, target),
        }
    }

    /// Report every class, object and cached resolution the linker keeps alive
    pub fn visit_roots(&self, visitor: &mut impl RootVisitor) {
        let classes = self.table.classes();
        for class in &classes {
            visitor.visit_root(Root::Class(class.id));
        }

        for loader in self.loaders.read().iter() {
            visitor.visit_root(Root::Object(loader.object));
        }

        self.interner.visit_roots(visitor);

        for class in &classes {
            let (linked, statics) = match (class.linked.get(), class.statics.get()) {
                (Some(linked), Some(statics)) => (linked, statics),
                _ => continue,
            };
            for offset in linked.static_reference_offsets.iter() {
                if let Some(Some(object)) = statics.read_reference(offset) {
                    visitor.visit_root(Root::Object(object));
                }
            }
        }

        for container in self.containers.read().iter() {
            container.cache.visit_roots(visitor);
        }
    }
}

fn circular(class: &Class) -> LinkError {
    LinkageError::CircularInheritance {
        class: class.descriptor().to_owned(),
    }
    .into()
}
