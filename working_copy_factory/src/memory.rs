use object_store::{memory::InMemory, ObjectStore};
use std::sync::Arc;

pub fn build_in_memory_working_copy() -> Result<Arc<dyn ObjectStore>, object_store::Error>
{
    let store = InMemory::new();
    Ok(Arc::new(store))
}
