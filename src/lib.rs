//! Synthesizes the CloudFormation stacks that run a Jenkins master and its
//! on-demand workers on ECS.

pub mod app;
pub mod asset;
pub mod config;
pub mod ecs;
pub mod environment;
pub mod iam;
pub mod master;
pub mod network;
pub mod outputs;
pub mod template;
pub mod worker;
pub mod writer;
