use crate::workflow::context::WorkflowContext;
use crate::workflow::WorkflowError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A trait for action functions that can be registered and executed
///
/// Actions are the side-effecting units of work invoked from workflows.
/// Inputs and outputs cross the registry boundary serialized, so registered
/// functions take deserializable input and return serializable output.
pub trait ActionFunction<I, O>: Send + Sync + 'static
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Execute the action with the given input
    fn execute(
        &self,
        input: I,
    ) -> Pin<Box<dyn Future<Output = Result<O, WorkflowError>> + Send>>;
}

/// A trait for workflow functions that can be registered and executed
///
/// Workflow functions receive a context for issuing action and child
/// workflow calls; every such call is intercepted and recorded.
pub trait WorkflowFunction<I, O>: Send + Sync + 'static
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Execute the workflow function with the given input and context
    fn execute(
        &self,
        input: I,
        context: WorkflowContext,
    ) -> Pin<Box<dyn Future<Output = Result<O, WorkflowError>> + Send>>;
}

/// A type-erased wrapper for action functions to enable storage in collections
pub struct BoxedAction {
    executor: Box<
        dyn Fn(Vec<u8>) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, WorkflowError>> + Send>>
            + Send
            + Sync,
    >,
}

impl BoxedAction {
    /// Create a new boxed action from a typed action function
    pub fn new<I, O, F>(func: F) -> Self
    where
        I: Send + for<'de> serde::Deserialize<'de> + 'static,
        O: Send + serde::Serialize + 'static,
        F: ActionFunction<I, O>,
    {
        let func = Arc::new(func);
        let executor = Box::new(move |input_bytes: Vec<u8>| {
            let func = func.clone();
            Box::pin(async move {
                let input: I = serde_json::from_slice(&input_bytes)
                    .map_err(|e| WorkflowError::DeserializationError(e.to_string()))?;

                let output = func.execute(input).await?;

                serde_json::to_vec(&output)
                    .map_err(|e| WorkflowError::SerializationError(e.to_string()))
            })
                as Pin<Box<dyn Future<Output = Result<Vec<u8>, WorkflowError>> + Send>>
        });

        BoxedAction { executor }
    }

    /// Execute the boxed action with serialized input
    pub async fn execute(&self, input: Vec<u8>) -> Result<Vec<u8>, WorkflowError> {
        (self.executor)(input).await
    }
}

/// A type-erased wrapper for workflow functions to enable storage in collections
pub struct BoxedWorkflow {
    executor: Box<
        dyn Fn(
                Vec<u8>,
                WorkflowContext,
            ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, WorkflowError>> + Send>>
            + Send
            + Sync,
    >,
}

impl BoxedWorkflow {
    /// Create a new boxed workflow from a typed workflow function
    pub fn new<I, O, F>(func: F) -> Self
    where
        I: Send + for<'de> serde::Deserialize<'de> + 'static,
        O: Send + serde::Serialize + 'static,
        F: WorkflowFunction<I, O>,
    {
        let func = Arc::new(func);
        let executor = Box::new(move |input_bytes: Vec<u8>, context: WorkflowContext| {
            let func = func.clone();
            Box::pin(async move {
                let input: I = serde_json::from_slice(&input_bytes)
                    .map_err(|e| WorkflowError::DeserializationError(e.to_string()))?;

                let output = func.execute(input, context).await?;

                serde_json::to_vec(&output)
                    .map_err(|e| WorkflowError::SerializationError(e.to_string()))
            })
                as Pin<Box<dyn Future<Output = Result<Vec<u8>, WorkflowError>> + Send>>
        });

        BoxedWorkflow { executor }
    }

    /// Execute the boxed workflow with serialized input
    pub async fn execute(
        &self,
        input: Vec<u8>,
        context: WorkflowContext,
    ) -> Result<Vec<u8>, WorkflowError> {
        (self.executor)(input, context).await
    }
}

/// A registry mapping action names to executable functions
///
/// Populated once at process start through explicit registration calls;
/// lookups are by name for the life of the process.
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<BoxedAction>>,
}

impl ActionRegistry {
    /// Create a new empty action registry
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Register an action function under the given name
    ///
    /// # Returns
    /// * `Ok(())` if registration was successful
    /// * `Err(WorkflowError::AlreadyRegistered)` if the name is taken
    pub fn register<I, O, F>(&mut self, name: &str, function: F) -> Result<(), WorkflowError>
    where
        I: Send + for<'de> serde::Deserialize<'de> + 'static,
        O: Send + serde::Serialize + 'static,
        F: ActionFunction<I, O>,
    {
        if self.actions.contains_key(name) {
            return Err(WorkflowError::AlreadyRegistered(name.to_string()));
        }

        self.actions
            .insert(name.to_string(), Arc::new(BoxedAction::new(function)));
        Ok(())
    }

    /// Register an action using a closure
    pub fn register_closure<I, O, F, Fut>(
        &mut self,
        name: &str,
        function: F,
    ) -> Result<(), WorkflowError>
    where
        I: Send + Sync + for<'de> serde::Deserialize<'de> + 'static,
        O: Send + Sync + serde::Serialize + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
    {
        struct ClosureAction<I, O, F, Fut>
        where
            F: Fn(I) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
        {
            closure: F,
            _phantom: std::marker::PhantomData<fn(I) -> (O, Fut)>,
        }

        impl<I, O, F, Fut> ActionFunction<I, O> for ClosureAction<I, O, F, Fut>
        where
            I: Send + Sync + for<'de> serde::Deserialize<'de> + 'static,
            O: Send + Sync + serde::Serialize + 'static,
            F: Fn(I) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
        {
            fn execute(
                &self,
                input: I,
            ) -> Pin<Box<dyn Future<Output = Result<O, WorkflowError>> + Send>> {
                Box::pin((self.closure)(input))
            }
        }

        self.register(
            name,
            ClosureAction {
                closure: function,
                _phantom: std::marker::PhantomData,
            },
        )
    }

    /// Look up an action by name
    pub fn get(&self, name: &str) -> Option<Arc<BoxedAction>> {
        self.actions.get(name).cloned()
    }

    /// Check if an action with the given name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Get the number of registered actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// List all registered action names
    pub fn list(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }
}

/// A registry mapping workflow names to executable functions
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, Arc<BoxedWorkflow>>,
}

impl WorkflowRegistry {
    /// Create a new empty workflow registry
    pub fn new() -> Self {
        Self {
            workflows: HashMap::new(),
        }
    }

    /// Register a workflow function under the given name
    pub fn register<I, O, F>(&mut self, name: &str, function: F) -> Result<(), WorkflowError>
    where
        I: Send + for<'de> serde::Deserialize<'de> + 'static,
        O: Send + serde::Serialize + 'static,
        F: WorkflowFunction<I, O>,
    {
        if self.workflows.contains_key(name) {
            return Err(WorkflowError::AlreadyRegistered(name.to_string()));
        }

        self.workflows
            .insert(name.to_string(), Arc::new(BoxedWorkflow::new(function)));
        Ok(())
    }

    /// Register a workflow using a closure
    pub fn register_closure<I, O, F, Fut>(
        &mut self,
        name: &str,
        function: F,
    ) -> Result<(), WorkflowError>
    where
        I: Send + Sync + for<'de> serde::Deserialize<'de> + 'static,
        O: Send + Sync + serde::Serialize + 'static,
        F: Fn(I, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
    {
        struct ClosureWorkflow<I, O, F, Fut>
        where
            F: Fn(I, WorkflowContext) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
        {
            closure: F,
            _phantom: std::marker::PhantomData<fn(I) -> (O, Fut)>,
        }

        impl<I, O, F, Fut> WorkflowFunction<I, O> for ClosureWorkflow<I, O, F, Fut>
        where
            I: Send + Sync + for<'de> serde::Deserialize<'de> + 'static,
            O: Send + Sync + serde::Serialize + 'static,
            F: Fn(I, WorkflowContext) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
        {
            fn execute(
                &self,
                input: I,
                context: WorkflowContext,
            ) -> Pin<Box<dyn Future<Output = Result<O, WorkflowError>> + Send>> {
                Box::pin((self.closure)(input, context))
            }
        }

        self.register(
            name,
            ClosureWorkflow {
                closure: function,
                _phantom: std::marker::PhantomData,
            },
        )
    }

    /// Look up a workflow by name
    pub fn get(&self, name: &str) -> Option<Arc<BoxedWorkflow>> {
        self.workflows.get(name).cloned()
    }

    /// Check if a workflow with the given name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.workflows.contains_key(name)
    }

    /// Get the number of registered workflows
    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// List all registered workflow names
    pub fn list(&self) -> Vec<String> {
        self.workflows.keys().cloned().collect()
    }
}
