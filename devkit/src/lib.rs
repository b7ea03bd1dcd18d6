/*!
# Opwatch DevKit - Stubs and Fixtures for Development

Library easing opwatch development and testing without a real PHP fleet:
- In-process HTTP stubs standing in for status agents
- Builders for realistic agent payloads
*/

pub mod agent_stub;
pub mod payloads;

pub use agent_stub::{StubAgent, StubBehavior};
pub use payloads::AgentPayloadBuilder;
