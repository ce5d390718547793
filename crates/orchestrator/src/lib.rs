pub mod canvas;
pub mod client;

pub use canvas::{build_job, Step};
pub use client::{JobClient, JobWaitStatus};

// 作业步骤之间的共享上下文在core中定义，这里按外部接口的归属再导出
pub use beehive_core::SharedContext;
