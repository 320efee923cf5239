//! Default collaborator implementations.

pub mod local_store;
pub mod makefile;
pub mod shell;
pub mod tcp;

pub use self::local_store::LocalArtifactStore;
pub use self::makefile::MakefileParser;
pub use self::shell::ShellRunner;
pub use self::tcp::TcpConnector;
