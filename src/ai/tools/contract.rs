//! Function declarations the model may call while auditing a
//! contract. The model decides when to call them; the relay answers
//! by feeding the submitted contract code back as a new user turn.

use std::fmt;

use serde::Serialize;

use crate::openai::{Function, Parameters, Property};

/// Name of the single argument every audit function takes.
pub const CONTRACT_CODE_ARG: &str = "contractCode";

#[derive(Clone, Serialize)]
pub struct ContractProps {
    #[serde(rename = "contractCode")]
    pub contract_code: Property,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditFunction {
    AnalyseContract,
    FindVulnerabilities,
}

impl AuditFunction {
    pub const ALL: [AuditFunction; 2] = [
        AuditFunction::AnalyseContract,
        AuditFunction::FindVulnerabilities,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AuditFunction::AnalyseContract => "analyseContract",
            AuditFunction::FindVulnerabilities => "findVulnerabilities",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AuditFunction::AnalyseContract => {
                "Analyzes a smart contract to provide an initial overview, function analysis, and code logic explanation."
            }
            AuditFunction::FindVulnerabilities => {
                "Conducts a detailed security analysis of a smart contract, identifying vulnerabilities and providing a comprehensive assessment."
            }
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn declaration(&self) -> Function<ContractProps> {
        Function {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: Parameters {
                r#type: String::from("object"),
                properties: ContractProps {
                    contract_code: Property {
                        r#type: String::from("string"),
                        description: String::from("The full Solidity code of the smart contract"),
                    },
                },
                required: vec![CONTRACT_CODE_ARG.to_string()],
                additional_properties: None,
            },
        }
    }
}

impl fmt::Display for AuditFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Every function registered with the model, in a stable order.
pub fn declarations() -> Vec<Function<ContractProps>> {
    AuditFunction::ALL.iter().map(|f| f.declaration()).collect()
}
