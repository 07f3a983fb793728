//! Schema migrations shipped with the application, oldest first.

pub mod add_contract_history;
pub mod add_soft_delete;
pub mod fix_contracts_typo;
pub mod make_employee_fields_optional;

use crate::migration::Migration;

pub fn builtin() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(add_soft_delete::AddSoftDelete),
        Box::new(add_contract_history::AddContractHistory),
        Box::new(fix_contracts_typo::FixContractsTypo),
        Box::new(make_employee_fields_optional::MakeEmployeeFieldsOptional),
    ]
}
