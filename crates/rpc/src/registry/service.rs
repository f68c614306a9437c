//! Services: named groups of methods sharing one receiver.

use super::method::{AsyncMethod, Method, MethodDescriptor, SyncMethod};
use crate::error::RegistrationError;

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::info;

/// Whether `name` may be exposed over the wire.
///
/// Exported names start with an uppercase letter. Names containing `.` could
/// never be addressed by a `Service.Method` string.
pub(crate) fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase) && !name.contains('.')
}

/// Last path segment of a type name, generics stripped.
fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}

/// A registered service.
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<MethodDescriptor>>,
}

impl Service {
    /// The service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a method by name.
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&Arc<MethodDescriptor>> {
        self.methods.get(name)
    }

    /// All methods, sorted by name.
    #[must_use]
    pub fn methods(&self) -> Vec<Arc<MethodDescriptor>> {
        let mut methods: Vec<_> = self.methods.values().cloned().collect();
        methods.sort_by(|a, b| a.name().cmp(b.name()));
        methods
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.methods())
            .finish()
    }
}

/// Builder collecting the methods of one receiver.
///
/// ```
/// use arpc::ServiceBuilder;
/// use serde::{Deserialize, Serialize};
///
/// struct Arith;
///
/// #[derive(Deserialize, Serialize)]
/// struct Args {
///     num1: i64,
///     num2: i64,
/// }
///
/// let service = ServiceBuilder::new(Arith)
///     .unwrap()
///     .method("Add", |_: &Arith, args: Args, reply: &mut i64| -> Result<(), String> {
///         *reply = args.num1 + args.num2;
///         Ok(())
///     })
///     .unwrap()
///     .build();
///
/// assert_eq!(service.name(), "Arith");
/// ```
pub struct ServiceBuilder<T> {
    name: String,
    instance: Arc<T>,
    methods: HashMap<String, Arc<MethodDescriptor>>,
}

impl<T: Send + Sync + 'static> ServiceBuilder<T> {
    /// Start a service named after the receiver's type.
    ///
    /// # Errors
    ///
    /// Returns an error if the type name is not exported.
    pub fn new(instance: T) -> Result<Self, RegistrationError> {
        Self::with_name(short_type_name::<T>(), instance)
    }

    /// Start a service with an explicit name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not exported.
    pub fn with_name(name: impl Into<String>, instance: T) -> Result<Self, RegistrationError> {
        Self::with_shared(name, Arc::new(instance))
    }

    /// Start a service over a receiver that is shared with other code.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not exported.
    pub fn with_shared(
        name: impl Into<String>,
        instance: Arc<T>,
    ) -> Result<Self, RegistrationError> {
        let name = name.into();
        if !is_exported(&name) {
            return Err(RegistrationError::InvalidServiceName(name));
        }

        Ok(Self {
            name,
            instance,
            methods: HashMap::new(),
        })
    }

    /// Add a method that fills in a default-constructed reply.
    ///
    /// The handler runs on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not exported or already taken.
    pub fn method<A, R, E, F>(self, name: &str, handler: F) -> Result<Self, RegistrationError>
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Default + Send + 'static,
        E: fmt::Display + 'static,
        F: Fn(&T, A, &mut R) -> Result<(), E> + Send + Sync + 'static,
    {
        let method = SyncMethod {
            instance: Arc::clone(&self.instance),
            handler: Arc::new(handler),
            _phantom: PhantomData,
        };
        self.add(name, Box::new(method))
    }

    /// Add an async method that returns its reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not exported or already taken.
    pub fn async_method<A, R, E, F, Fut>(
        self,
        name: &str,
        handler: F,
    ) -> Result<Self, RegistrationError>
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: fmt::Display,
        F: Fn(Arc<T>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let method = AsyncMethod {
            instance: Arc::clone(&self.instance),
            handler: Arc::new(handler),
            _phantom: PhantomData,
        };
        self.add(name, Box::new(method))
    }

    fn add(mut self, name: &str, method: Box<dyn Method>) -> Result<Self, RegistrationError> {
        if !is_exported(name) {
            return Err(RegistrationError::InvalidMethodName(name.to_string()));
        }
        if self.methods.contains_key(name) {
            return Err(RegistrationError::DuplicateMethod(format!(
                "{}.{name}",
                self.name
            )));
        }

        info!("rpc server: register {}.{}", self.name, name);
        self.methods.insert(
            name.to_string(),
            Arc::new(MethodDescriptor::new(name.to_string(), method)),
        );
        Ok(self)
    }

    /// Finish the service.
    #[must_use]
    pub fn build(self) -> Service {
        Service {
            name: self.name,
            methods: self.methods,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arpc_codec::CodecType;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Counter {
        total: AtomicU64,
    }

    #[derive(Deserialize, Serialize)]
    struct Args {
        num1: i64,
        num2: i64,
    }

    fn counter() -> Counter {
        Counter {
            total: AtomicU64::new(0),
        }
    }

    #[test]
    fn test_service_name_from_type() {
        let service = ServiceBuilder::new(counter()).unwrap().build();
        assert_eq!(service.name(), "Counter");
    }

    #[test]
    fn test_rejects_unexported_names() {
        assert!(matches!(
            ServiceBuilder::with_name("arith", counter()),
            Err(RegistrationError::InvalidServiceName(_))
        ));
        assert!(matches!(
            ServiceBuilder::with_name("", counter()),
            Err(RegistrationError::InvalidServiceName(_))
        ));
        assert!(matches!(
            ServiceBuilder::with_name("Foo.Bar", counter()),
            Err(RegistrationError::InvalidServiceName(_))
        ));

        let result = ServiceBuilder::new(counter()).unwrap().method(
            "add",
            |_: &Counter, _: Args, _: &mut i64| -> Result<(), String> { Ok(()) },
        );
        assert!(matches!(
            result,
            Err(RegistrationError::InvalidMethodName(name)) if name == "add"
        ));
    }

    #[test]
    fn test_rejects_duplicate_method() {
        let result = ServiceBuilder::new(counter())
            .unwrap()
            .method("Add", |_: &Counter, _: Args, _: &mut i64| -> Result<(), String> { Ok(()) })
            .unwrap()
            .method("Add", |_: &Counter, _: Args, _: &mut i64| -> Result<(), String> { Ok(()) });

        assert!(matches!(
            result,
            Err(RegistrationError::DuplicateMethod(name)) if name == "Counter.Add"
        ));
    }

    #[tokio::test]
    async fn test_invoke_counts_calls() {
        let service = ServiceBuilder::new(counter())
            .unwrap()
            .method("Add", |this: &Counter, args: Args, reply: &mut i64| -> Result<(), String> {
                this.total.fetch_add(1, Ordering::SeqCst);
                *reply = args.num1 + args.num2;
                Ok(())
            })
            .unwrap()
            .async_method("Total", |this: Arc<Counter>, (): ()| async move {
                Ok::<_, String>(this.total.load(Ordering::SeqCst))
            })
            .unwrap()
            .build();

        let codec = CodecType::Cbor;
        let add = service.method("Add").unwrap();
        let body = codec.encode(&Args { num1: 2, num2: 3 }).unwrap();

        let invocation = add.prepare(codec, &body).unwrap();
        let reply = add.invoke(invocation).await.unwrap();
        assert_eq!(codec.decode::<i64>(&reply).unwrap(), 5);
        assert_eq!(add.num_calls(), 1);

        let total = service.method("Total").unwrap();
        let invocation = total.prepare(codec, &codec.encode(&()).unwrap()).unwrap();
        let reply = total.invoke(invocation).await.unwrap();
        assert_eq!(codec.decode::<u64>(&reply).unwrap(), 1);

        let names: Vec<_> = service
            .methods()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        assert_eq!(names, ["Add", "Total"]);
    }

    #[tokio::test]
    async fn test_handler_error_and_bad_argument() {
        let service = ServiceBuilder::with_name("Div", counter())
            .unwrap()
            .method("Quo", |_: &Counter, args: Args, reply: &mut i64| {
                if args.num2 == 0 {
                    return Err("divide by zero");
                }
                *reply = args.num1 / args.num2;
                Ok(())
            })
            .unwrap()
            .build();

        let codec = CodecType::Json;
        let quo = service.method("Quo").unwrap();

        let body = codec.encode(&Args { num1: 1, num2: 0 }).unwrap();
        let invocation = quo.prepare(codec, &body).unwrap();
        assert_eq!(quo.invoke(invocation).await.unwrap_err(), "divide by zero");

        assert!(quo.prepare(codec, b"\"nope\"").is_err());
    }
}
