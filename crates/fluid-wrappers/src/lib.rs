//! Typed bindings for the helper contracts the deployment tooling talks to.
//!
//! Only the functions and events the tooling calls are declared, so the
//! bindings are generated from human-readable ABIs instead of compiled
//! artifacts.

pub mod create3_factory {
    use ethers::prelude::abigen;

    // Alias `deploy(bytes32,bytes)` to `deploy_create3()` so it can't be
    // mistaken for the builtin constructor `deploy()` of the generated
    // wrappers.
    abigen!(
        Create3Factory,
        r#"[
            function getDeployed(bytes32 salt) external view returns (address deployed)
            function deploy(bytes32 salt, bytes creationCode) external payable returns (address deployed)
            event LogContractDeployed(address indexed deployed, bytes32 indexed salt)
        ]"#,
        methods {
            deploy(bytes32,bytes) as deploy_create3;
        },
        derives(serde::Serialize, serde::Deserialize),
    );
}

pub mod sstore2_deployer {
    use ethers::prelude::abigen;

    abigen!(
        Sstore2Deployer,
        r#"[
            function deployCode(bytes code) external returns (address pointer)
            function deployCodeSplit(bytes code) external returns (address pointer, address secondPointer)
            event LogCodeDeployed(address indexed pointer)
            event LogCodeSplitDeployed(address indexed pointer, address indexed secondPointer)
        ]"#,
        derives(serde::Serialize, serde::Deserialize),
    );
}
